//! GPU frame FFT using wgpu compute shaders.
//!
//! Transforms are encoded, not submitted: the caller records any number of
//! frames into one command encoder and submits once.

use std::sync::Arc;
use wgpu::{BindGroupLayout, Buffer, CommandEncoder, Device};

use super::buffers::{create_storage_buffer, FftParamBuffers};
use super::pipelines::{create_bind_group, create_compute_layout, FftPipelines};

/// Errors that can occur while encoding GPU FFT passes.
#[derive(Debug, thiserror::Error)]
pub enum GpuFftError {
    #[error("FFT size must be a power of 2 and at least 2, got {0}")]
    InvalidFftSize(usize),
}

const WORKGROUP_SIZE: u32 = 256;

/// Radix-2 FFT over frames already resident in device buffers.
pub struct GpuFft {
    device: Arc<Device>,
    layout: BindGroupLayout,
    pipelines: FftPipelines,
    params: FftParamBuffers,
}

impl GpuFft {
    pub fn new(device: Arc<Device>) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("fft_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/fft.wgsl").into()),
        });

        let layout = create_compute_layout(&device, "fft");
        let pipelines = FftPipelines::new(&device, &shader, &layout);

        Self {
            device,
            layout,
            pipelines,
            params: FftParamBuffers::new(),
        }
    }

    /// Layout shared with stretch kernels.
    pub fn layout(&self) -> &BindGroupLayout {
        &self.layout
    }

    /// Record a forward transform of `n` real samples in `input` into `n`
    /// interleaved complex bins in `output`.
    pub fn encode_forward(
        &self,
        encoder: &mut CommandEncoder,
        input: &Buffer,
        output: &Buffer,
        n: usize,
    ) -> Result<(), GpuFftError> {
        Self::check_size(n)?;
        let stages = self.params.stages(&self.device, n, false);

        self.encode_pass(encoder, "load_real", &self.pipelines.load_real, input, output, &stages[0], n);
        self.encode_butterflies(encoder, input, output, &stages, n);
        Ok(())
    }

    /// Record an inverse transform of `n` complex bins in `input` into `n`
    /// real samples in `output`, scaled by `1/n`.
    ///
    /// Returns the scratch buffer, which must outlive the submission.
    pub fn encode_inverse(
        &self,
        encoder: &mut CommandEncoder,
        input: &Buffer,
        output: &Buffer,
        n: usize,
    ) -> Result<Buffer, GpuFftError> {
        Self::check_size(n)?;
        let stages = self.params.stages(&self.device, n, true);
        let scratch = create_storage_buffer(&self.device, "fft_scratch", n * 2);

        self.encode_pass(encoder, "load_complex", &self.pipelines.load_complex, input, &scratch, &stages[0], n);
        self.encode_butterflies(encoder, input, &scratch, &stages, n);
        self.encode_pass(encoder, "store_real", &self.pipelines.store_real, &scratch, output, &stages[0], n);
        Ok(scratch)
    }

    // --- Private helpers ---

    fn check_size(n: usize) -> Result<(), GpuFftError> {
        if n < 2 || !n.is_power_of_two() {
            return Err(GpuFftError::InvalidFftSize(n));
        }
        Ok(())
    }

    // Butterflies work in place on `work`; `unused` fills binding 0 so the
    // bind group never aliases one buffer as both read and read_write.
    fn encode_butterflies(
        &self,
        encoder: &mut CommandEncoder,
        unused: &Buffer,
        work: &Buffer,
        stages: &[Buffer],
        n: usize,
    ) {
        for params in stages {
            self.encode_pass(encoder, "butterfly", &self.pipelines.butterfly, unused, work, params, n / 2);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_pass(
        &self,
        encoder: &mut CommandEncoder,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        input: &Buffer,
        output: &Buffer,
        params: &Buffer,
        invocations: usize,
    ) {
        let bind_group = create_bind_group(&self.device, label, &self.layout, input, output, params);

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups((invocations as u32).div_ceil(WORKGROUP_SIZE), 1, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_check() {
        assert!(GpuFft::check_size(2048).is_ok());
        assert!(matches!(
            GpuFft::check_size(1000),
            Err(GpuFftError::InvalidFftSize(1000))
        ));
        assert!(GpuFft::check_size(1).is_err());
    }
}
