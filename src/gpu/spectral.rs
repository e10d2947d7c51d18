//! Forward and inverse transforms between time-domain and frequency-domain
//! buffer groups.

use std::sync::Arc;

use super::device::{Accelerator, Direction, TransformJob};
use super::error::ComputeError;
use super::registry::{DeviceRegistry, MemoryHandle};

/// Shortest frame the transform passes accept.
pub const MIN_TRANSFORM_LEN: usize = 128;

/// Converts buffer groups between domains. The output is always a new group;
/// the input survives unless `keep` is false and the transform succeeded.
pub struct SpectralEngine<A: Accelerator> {
    registry: Arc<DeviceRegistry<A>>,
}

impl<A: Accelerator> Clone for SpectralEngine<A> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<A: Accelerator> SpectralEngine<A> {
    pub fn new(registry: Arc<DeviceRegistry<A>>) -> Self {
        Self { registry }
    }

    /// Real frames to complex spectra, one submission per frame.
    pub fn forward(&self, handle: MemoryHandle, keep: bool) -> Result<MemoryHandle, ComputeError> {
        self.run(handle, Direction::Forward, false, keep)
    }

    /// Complex spectra to real frames, one submission per frame.
    pub fn inverse(&self, handle: MemoryHandle, keep: bool) -> Result<MemoryHandle, ComputeError> {
        self.run(handle, Direction::Inverse, false, keep)
    }

    /// Forward transform of every frame in a single submission.
    pub fn forward_many(&self, handle: MemoryHandle, keep: bool) -> Result<MemoryHandle, ComputeError> {
        self.run(handle, Direction::Forward, true, keep)
    }

    /// Inverse transform of every frame in a single submission.
    pub fn inverse_many(&self, handle: MemoryHandle, keep: bool) -> Result<MemoryHandle, ComputeError> {
        self.run(handle, Direction::Inverse, true, keep)
    }

    /// Dispatch on direction and batching in one call.
    pub fn transform(
        &self,
        handle: MemoryHandle,
        direction: Direction,
        batched: bool,
        keep: bool,
    ) -> Result<MemoryHandle, ComputeError> {
        self.run(handle, direction, batched, keep)
    }

    fn run(
        &self,
        handle: MemoryHandle,
        direction: Direction,
        batched: bool,
        keep: bool,
    ) -> Result<MemoryHandle, ComputeError> {
        let input = self.registry.view(handle)?;
        if input.kind != direction.input_kind() {
            return Err(ComputeError::DomainMismatch {
                handle,
                expected: direction.input_kind(),
                found: input.kind,
            });
        }
        for (index, &len) in input.lengths.iter().enumerate() {
            if len < MIN_TRANSFORM_LEN || !len.is_power_of_two() {
                return Err(ComputeError::InvalidFrameLength {
                    index,
                    len,
                    min: MIN_TRANSFORM_LEN,
                });
            }
        }

        let stream = self.registry.get_stream()?;
        let output = self
            .registry
            .allocate_group_of(direction.output_kind(), &input.lengths)?;

        let submitted = self.registry.view(output).and_then(|out| {
            let accelerator = self.registry.accelerator();
            let jobs: Vec<TransformJob<'_, A::Buffer>> = input
                .buffers
                .iter()
                .zip(&out.buffers)
                .zip(&input.lengths)
                .map(|((src, dst), &len)| TransformJob {
                    input: src.as_ref(),
                    output: dst.as_ref(),
                    len,
                })
                .collect();

            if batched {
                accelerator.transform(&stream.inner, &jobs, direction)?;
                accelerator.synchronize(&stream.inner)?;
            } else {
                for job in jobs.chunks(1) {
                    accelerator.transform(&stream.inner, job, direction)?;
                    accelerator.synchronize(&stream.inner)?;
                }
            }
            Ok(())
        });

        if let Err(e) = submitted {
            log::warn!("{:?} transform of {} failed: {}", direction, handle, e);
            let _ = self.registry.free(output);
            return Err(e);
        }

        log::debug!(
            "{:?} transform {} -> {} ({} frames, batched={})",
            direction,
            handle,
            output,
            input.lengths.len(),
            batched
        );

        if !keep {
            self.registry.free(handle)?;
        }
        Ok(output)
    }
}
