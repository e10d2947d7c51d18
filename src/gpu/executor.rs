//! Time-stretch kernel dispatch over a frame group.
//!
//! The kernel works on spectra, so time-domain input is transformed first and
//! the stretched spectra are transformed back. With [`StreamPolicy::Interleaved`]
//! frame `i` runs on stream `i % s`, one host worker per stream; all streams
//! are joined before the inverse transform starts.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::device::{Accelerator, Direction, ElementKind, LaunchGeometry, StretchParams};
use super::error::ComputeError;
use super::kernels::{KernelLoader, KernelProgram};
use super::registry::{DeviceRegistry, ExecStream, GroupView, MemoryHandle};
use super::spectral::SpectralEngine;
use crate::config::StreamPolicy;

/// Parameters of one stretch run.
#[derive(Debug, Clone, PartialEq)]
pub struct StretchRequest {
    pub kernel: String,
    pub factor: f64,
    pub frame_size: usize,
    /// Overlap between consecutive frames, in samples.
    pub overlap_size: usize,
    pub sample_rate: u32,
    pub policy: StreamPolicy,
    /// Submit transforms for all frames at once.
    pub batched: bool,
    /// Keep the input group alive after success.
    pub keep: bool,
}

/// Reject factors that are not finite and positive once narrowed to the
/// `f32` the kernels receive.
pub fn check_factor(factor: f64) -> Result<(), ComputeError> {
    let narrowed = factor as f32;
    if narrowed.is_finite() && narrowed > 0.0 {
        Ok(())
    } else {
        Err(ComputeError::InvalidFactor(factor))
    }
}

pub struct TimeStretchExecutor<A: Accelerator> {
    registry: Arc<DeviceRegistry<A>>,
    spectral: SpectralEngine<A>,
    kernels: Arc<KernelLoader<A>>,
}

impl<A: Accelerator> TimeStretchExecutor<A> {
    pub fn new(registry: Arc<DeviceRegistry<A>>, kernels: Arc<KernelLoader<A>>) -> Self {
        Self {
            spectral: SpectralEngine::new(registry.clone()),
            registry,
            kernels,
        }
    }

    /// Stretch every frame of `handle` and return the group holding the
    /// result, in the same domain as the input.
    ///
    /// On error every group created here is freed and `handle` is untouched.
    pub fn run(
        &self,
        handle: MemoryHandle,
        request: &StretchRequest,
        cancel: &CancellationToken,
    ) -> Result<MemoryHandle, ComputeError> {
        check_factor(request.factor)?;
        let info = self.registry.info(handle)?;
        if info.count == 0 {
            return Err(ComputeError::EmptyInput);
        }
        if let Some((index, &len)) = info
            .lengths
            .iter()
            .enumerate()
            .find(|&(_, &len)| len != request.frame_size)
        {
            return Err(ComputeError::FrameSizeMismatch {
                index,
                len,
                expected: request.frame_size,
            });
        }
        if request.policy.streams() == 0 {
            return Err(ComputeError::InvalidStreamCount(0));
        }
        if cancel.is_cancelled() {
            return Err(ComputeError::Cancelled);
        }

        let kernel = self.kernels.load(&request.kernel)?;

        let mut created = Vec::new();
        match self.dispatch(handle, info.kind, request, &kernel, cancel, &mut created) {
            Ok(output) => {
                let mut stale: Vec<MemoryHandle> =
                    created.into_iter().filter(|&h| h != output).collect();
                if !request.keep {
                    stale.push(handle);
                }
                for group in stale {
                    if let Err(e) = self.registry.free(group) {
                        log::warn!("Could not free {} after stretch: {}", group, e);
                    }
                }
                log::info!(
                    "Stretched {} by {:.4} with '{}' -> {} ({} frames)",
                    handle,
                    request.factor,
                    request.kernel,
                    output,
                    info.count
                );
                Ok(output)
            }
            Err(e) => {
                for intermediate in created {
                    let _ = self.registry.free(intermediate);
                }
                log::warn!("Stretch of {} aborted: {}", handle, e);
                Err(e)
            }
        }
    }

    fn dispatch(
        &self,
        handle: MemoryHandle,
        kind: ElementKind,
        request: &StretchRequest,
        kernel: &KernelProgram<A>,
        cancel: &CancellationToken,
        created: &mut Vec<MemoryHandle>,
    ) -> Result<MemoryHandle, ComputeError> {
        let transformed = kind == ElementKind::Real;
        let spectrum = if transformed {
            let h = self
                .spectral
                .transform(handle, Direction::Forward, request.batched, true)?;
            created.push(h);
            h
        } else {
            handle
        };

        let input = self.registry.view(spectrum)?;
        let output = self
            .registry
            .allocate_group_of(ElementKind::Complex, &input.lengths)?;
        created.push(output);
        let output_view = self.registry.view(output)?;

        match request.policy {
            StreamPolicy::Single => {
                let stream = self.registry.get_stream()?;
                for index in 0..input.lengths.len() {
                    self.launch(&stream, kernel, &input, &output_view, index, request, cancel)?;
                    self.registry.accelerator().synchronize(&stream.inner)?;
                }
            }
            StreamPolicy::Interleaved { max_streams } => {
                let streams = self
                    .registry
                    .get_streams(max_streams.min(input.lengths.len()))?;
                self.run_interleaved(&streams, kernel, &input, &output_view, request, cancel)?;
            }
        }

        if transformed {
            let restored = self
                .spectral
                .transform(output, Direction::Inverse, request.batched, true)?;
            created.push(restored);
            Ok(restored)
        } else {
            Ok(output)
        }
    }

    fn run_interleaved(
        &self,
        streams: &[Arc<ExecStream<A>>],
        kernel: &KernelProgram<A>,
        input: &GroupView<A>,
        output: &GroupView<A>,
        request: &StretchRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ComputeError> {
        let count = input.lengths.len();
        let results: Vec<Result<(), ComputeError>> = std::thread::scope(|scope| {
            let workers: Vec<_> = streams
                .iter()
                .enumerate()
                .map(|(lane, stream)| {
                    scope.spawn(move || {
                        for index in (lane..count).step_by(streams.len()) {
                            self.launch(stream, kernel, input, output, index, request, cancel)?;
                        }
                        self.registry.accelerator().synchronize(&stream.inner)?;
                        Ok(())
                    })
                })
                .collect();

            workers
                .into_iter()
                .map(|worker| {
                    worker.join().unwrap_or_else(|_| {
                        Err(ComputeError::Device(super::device::DeviceError::Launch(
                            "stream worker panicked".to_string(),
                        )))
                    })
                })
                .collect()
        });

        // Barrier: every stream has been joined and synchronized here.
        results.into_iter().collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn launch(
        &self,
        stream: &ExecStream<A>,
        kernel: &KernelProgram<A>,
        input: &GroupView<A>,
        output: &GroupView<A>,
        index: usize,
        request: &StretchRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ComputeError> {
        if cancel.is_cancelled() {
            return Err(ComputeError::Cancelled);
        }
        let len = input.lengths[index];
        let params = StretchParams::new(len, request.overlap_size, request.sample_rate, request.factor);
        self.registry.accelerator().launch(
            &stream.inner,
            &kernel.program,
            &input.buffers[index],
            &output.buffers[index],
            &params,
            LaunchGeometry::for_frame(len),
        )?;
        Ok(())
    }
}
