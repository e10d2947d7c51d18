//! wgpu implementation of [`Accelerator`].
//!
//! wgpu exposes a single queue per device, so every stream submits to the
//! same queue and a stream is only a submission context. Kernels are WGSL
//! validated with naga before any pipeline is built, which turns malformed
//! kernels into errors instead of device-lost panics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::compute::buffers::{create_staging_buffer, create_storage_buffer, create_uniform_buffer};
use super::compute::pipelines::{create_bind_group, create_pipeline};
use super::compute::GpuFft;
use super::context::{ContextOptions, GpuContext, GpuError};
use super::device::{
    Accelerator, DeviceError, Direction, LaunchGeometry, StretchParams, TransformJob,
    KERNEL_ENTRY_POINT, KERNEL_WORKGROUP_SIZE,
};

/// Storage buffer on the GPU.
pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    words: usize,
    in_use: Arc<AtomicU64>,
}

impl WgpuBuffer {
    pub fn words(&self) -> usize {
        self.words
    }

    fn bytes(&self) -> u64 {
        (self.words * std::mem::size_of::<f32>()) as u64
    }
}

impl Drop for WgpuBuffer {
    fn drop(&mut self) {
        self.in_use.fetch_sub(self.bytes(), Ordering::SeqCst);
    }
}

/// Submission context on the device queue.
pub struct WgpuStream {
    id: usize,
    submissions: AtomicUsize,
}

impl WgpuStream {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

/// A validated stretch kernel and its compute pipeline.
pub struct WgpuProgram {
    pub name: String,
    pipeline: wgpu::ComputePipeline,
}

/// Accelerator backed by a wgpu device.
pub struct WgpuAccelerator {
    context: GpuContext,
    fft: GpuFft,
    memory_limit: u64,
    in_use: Arc<AtomicU64>,
}

impl WgpuAccelerator {
    /// Acquire the default adapter, blocking on device creation.
    pub fn new() -> Result<Self, GpuError> {
        Self::with_options(ContextOptions::default())
    }

    pub fn with_options(options: ContextOptions) -> Result<Self, GpuError> {
        let context = pollster::block_on(GpuContext::with_options(options))?;
        Ok(Self::from_context(context))
    }

    pub fn from_context(context: GpuContext) -> Self {
        let fft = GpuFft::new(context.device.clone());
        Self {
            context,
            fft,
            memory_limit: u64::MAX,
            in_use: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cap the total bytes held by live buffers.
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = bytes;
        self
    }

    pub fn bytes_in_use(&self) -> u64 {
        self.in_use.load(Ordering::SeqCst)
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    fn device(&self) -> &wgpu::Device {
        &self.context.device
    }

    fn poll(&self) -> Result<(), DeviceError> {
        self.device()
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| DeviceError::Poll(e.to_string()))
    }

    fn check_words(buffer: &WgpuBuffer, requested: usize) -> Result<(), DeviceError> {
        if requested > buffer.words {
            return Err(DeviceError::BufferRange {
                requested,
                available: buffer.words,
            });
        }
        Ok(())
    }
}

/// Parse and validate a kernel, and check it exports the expected entry point.
pub fn validate_kernel(name: &str, source: &str) -> Result<(), DeviceError> {
    let compile_error = |message: String| DeviceError::Compile {
        name: name.to_string(),
        message,
    };

    let module = naga::front::wgsl::parse_str(source).map_err(|e| compile_error(e.emit_to_string(source)))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    );
    validator
        .validate(&module)
        .map_err(|e| compile_error(e.emit_to_string(source)))?;

    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.name == KERNEL_ENTRY_POINT && ep.stage == naga::ShaderStage::Compute)
        .ok_or_else(|| compile_error(format!("missing compute entry point '{}'", KERNEL_ENTRY_POINT)))?;

    if entry.workgroup_size != [KERNEL_WORKGROUP_SIZE, 1, 1] {
        return Err(compile_error(format!(
            "workgroup size must be ({}, 1, 1), got {:?}",
            KERNEL_WORKGROUP_SIZE, entry.workgroup_size
        )));
    }

    for (_, global) in module.global_variables.iter() {
        if let Some(binding) = &global.binding {
            if binding.group != 0 || binding.binding > 2 {
                return Err(compile_error(format!(
                    "unexpected resource at group {} binding {}",
                    binding.group, binding.binding
                )));
            }
        }
    }

    Ok(())
}

impl Accelerator for WgpuAccelerator {
    type Buffer = WgpuBuffer;
    type Stream = WgpuStream;
    type Program = WgpuProgram;

    fn label(&self) -> String {
        let info = self.context.adapter_info();
        format!("{} ({:?})", info.name, info.backend)
    }

    fn allocate(&self, words: usize) -> Result<WgpuBuffer, DeviceError> {
        if words == 0 {
            return Err(DeviceError::InvalidAllocation(
                "zero-length buffer".to_string(),
            ));
        }
        let bytes = (words * std::mem::size_of::<f32>()) as u64;
        let limits = self.device().limits();
        let binding_limit = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        if bytes > binding_limit {
            return Err(DeviceError::OutOfMemory {
                requested: bytes,
                limit: binding_limit,
            });
        }

        let previous = self.in_use.fetch_add(bytes, Ordering::SeqCst);
        if previous.saturating_add(bytes) > self.memory_limit {
            self.in_use.fetch_sub(bytes, Ordering::SeqCst);
            return Err(DeviceError::OutOfMemory {
                requested: bytes,
                limit: self.memory_limit,
            });
        }

        Ok(WgpuBuffer {
            buffer: create_storage_buffer(self.device(), "frame_buffer", words),
            words,
            in_use: self.in_use.clone(),
        })
    }

    fn upload(&self, buffer: &WgpuBuffer, data: &[f32]) -> Result<(), DeviceError> {
        Self::check_words(buffer, data.len())?;
        if !data.is_empty() {
            self.context
                .queue
                .write_buffer(&buffer.buffer, 0, bytemuck::cast_slice(data));
        }
        Ok(())
    }

    fn download(&self, buffer: &WgpuBuffer, words: usize) -> Result<Vec<f32>, DeviceError> {
        Self::check_words(buffer, words)?;
        if words == 0 {
            return Ok(Vec::new());
        }
        let size = (words * std::mem::size_of::<f32>()) as u64;
        let staging = create_staging_buffer(self.device(), size);

        let mut encoder = self
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame_readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, size);
        self.context.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..size);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.poll()?;

        rx.recv()
            .map_err(|e| DeviceError::BufferMapFailed(e.to_string()))?
            .map_err(|e| DeviceError::BufferMapFailed(format!("{:?}", e)))?;

        let data = slice.get_mapped_range();
        let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();

        Ok(result)
    }

    fn create_stream(&self, id: usize) -> Result<WgpuStream, DeviceError> {
        Ok(WgpuStream {
            id,
            submissions: AtomicUsize::new(0),
        })
    }

    fn transform(
        &self,
        stream: &WgpuStream,
        jobs: &[TransformJob<'_, WgpuBuffer>],
        direction: Direction,
    ) -> Result<(), DeviceError> {
        let mut encoder = self
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame_fft_encoder"),
            });
        // Inverse scratch buffers must live until the submission is queued.
        let mut scratch = Vec::new();

        for job in jobs {
            Self::check_words(job.input, job.len * direction.input_kind().words())?;
            Self::check_words(job.output, job.len * direction.output_kind().words())?;

            match direction {
                Direction::Forward => self
                    .fft
                    .encode_forward(&mut encoder, &job.input.buffer, &job.output.buffer, job.len)
                    .map_err(|e| DeviceError::Transform(e.to_string()))?,
                Direction::Inverse => scratch.push(
                    self.fft
                        .encode_inverse(&mut encoder, &job.input.buffer, &job.output.buffer, job.len)
                        .map_err(|e| DeviceError::Transform(e.to_string()))?,
                ),
            }
        }

        self.context.queue.submit(Some(encoder.finish()));
        stream.submissions.fetch_add(1, Ordering::SeqCst);
        drop(scratch);
        Ok(())
    }

    fn compile(&self, name: &str, source: &str) -> Result<WgpuProgram, DeviceError> {
        validate_kernel(name, source)?;

        let module = self
            .device()
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let pipeline = create_pipeline(self.device(), &module, self.fft.layout(), KERNEL_ENTRY_POINT);

        log::debug!("Built kernel pipeline '{}'", name);
        Ok(WgpuProgram {
            name: name.to_string(),
            pipeline,
        })
    }

    fn launch(
        &self,
        stream: &WgpuStream,
        program: &WgpuProgram,
        input: &WgpuBuffer,
        output: &WgpuBuffer,
        params: &StretchParams,
        geometry: LaunchGeometry,
    ) -> Result<(), DeviceError> {
        if geometry.invocations() < params.length as u64 {
            return Err(DeviceError::Launch(format!(
                "geometry covers {} invocations for {} bins",
                geometry.invocations(),
                params.length
            )));
        }

        let uniform = create_uniform_buffer(self.device(), "stretch_params", params);
        let bind_group = create_bind_group(
            self.device(),
            &program.name,
            self.fft.layout(),
            &input.buffer,
            &output.buffer,
            &uniform,
        );

        let mut encoder = self
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("stretch_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("stretch_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(geometry.x, geometry.y, geometry.z);
        }
        self.context.queue.submit(Some(encoder.finish()));
        stream.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn synchronize(&self, _stream: &WgpuStream) -> Result<(), DeviceError> {
        self.poll()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLED: &str = include_str!("../../kernels/timestretch00.wgsl");

    #[test]
    fn test_bundled_kernel_validates() {
        assert!(validate_kernel("timestretch00", BUNDLED).is_ok());
    }

    #[test]
    fn test_syntax_error_reported() {
        let result = validate_kernel("broken", "@compute fn stretch( {");
        assert!(matches!(result, Err(DeviceError::Compile { .. })));
    }

    #[test]
    fn test_missing_entry_point() {
        let source = "@compute @workgroup_size(256) fn main() {}";
        let err = validate_kernel("no_entry", source).unwrap_err();
        assert!(err.to_string().contains("stretch"));
    }

    #[test]
    fn test_wrong_workgroup_size() {
        let source = "@compute @workgroup_size(64) fn stretch() {}";
        assert!(validate_kernel("narrow", source).is_err());
    }

    #[test]
    fn test_allocate_and_round_trip() {
        let Ok(gpu) = WgpuAccelerator::new() else {
            return;
        };
        let buffer = gpu.allocate(256).unwrap();
        assert_eq!(gpu.bytes_in_use(), 1024);
        let data: Vec<f32> = (0..256).map(|i| i as f32).collect();
        gpu.upload(&buffer, &data).unwrap();
        assert_eq!(gpu.download(&buffer, 256).unwrap(), data);
        drop(buffer);
        assert_eq!(gpu.bytes_in_use(), 0);
    }
}
