//! CPU reference accelerator.
//!
//! Mirrors the wgpu backend on the host: buffers are plain `f32` vectors,
//! transforms run through RustFFT, and kernels are native Rust ports of the
//! bundled WGSL kernels. Kernel sources are still resolved from disk by the
//! loader, so name resolution and caching behave exactly as on the GPU.
//! Launches execute synchronously on the calling thread; concurrency comes
//! from the executor driving several streams from several threads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::device::{
    Accelerator, ComplexSample, DeviceError, Direction, LaunchGeometry, StretchParams,
    TransformJob, KERNEL_ENTRY_POINT,
};
use crate::audio::fft::FrameFft;

/// Native kernel body: reads one input frame and writes one output frame.
pub type NativeKernel =
    fn(input: &[ComplexSample], output: &mut [ComplexSample], params: &StretchParams) -> Result<(), String>;

/// Magnitude-preserving phase rescale, the host port of `timestretch00.wgsl`.
pub fn phase_rescale(
    input: &[ComplexSample],
    output: &mut [ComplexSample],
    params: &StretchParams,
) -> Result<(), String> {
    let len = (params.length as usize).min(input.len()).min(output.len());
    for (dst, src) in output[..len].iter_mut().zip(&input[..len]) {
        let magnitude = src.norm();
        let phase = src.im.atan2(src.re) / params.factor;
        *dst = ComplexSample::new(magnitude * phase.cos(), magnitude * phase.sin());
    }
    Ok(())
}

/// Host-resident buffer. Returns its bytes to the accelerator budget on drop.
pub struct HostBuffer {
    data: RwLock<Vec<f32>>,
    bytes: u64,
    in_use: Arc<AtomicU64>,
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        self.in_use.fetch_sub(self.bytes, Ordering::SeqCst);
    }
}

/// Host execution stream. Work runs on submission, so ordering is trivial.
pub struct HostStream {
    id: usize,
    launches: AtomicUsize,
}

impl HostStream {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Kernel launches submitted on this stream so far.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

/// Kernel built by the host backend.
pub struct HostProgram {
    pub name: String,
    kernel: NativeKernel,
}

/// CPU accelerator with an optional memory budget.
pub struct HostAccelerator {
    fft: FrameFft,
    kernels: HashMap<String, NativeKernel>,
    memory_limit: u64,
    in_use: Arc<AtomicU64>,
}

impl Default for HostAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl HostAccelerator {
    /// Host backend with the bundled kernels and no memory limit.
    pub fn new() -> Self {
        let mut kernels: HashMap<String, NativeKernel> = HashMap::new();
        kernels.insert("timestretch00".to_string(), phase_rescale);

        Self {
            fft: FrameFft::new(),
            kernels,
            memory_limit: u64::MAX,
            in_use: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cap the bytes that may be allocated at once.
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Register a native implementation for a kernel name.
    pub fn with_kernel(mut self, name: impl Into<String>, kernel: NativeKernel) -> Self {
        self.kernels.insert(name.into(), kernel);
        self
    }

    /// Bytes currently held by live buffers.
    pub fn bytes_in_use(&self) -> u64 {
        self.in_use.load(Ordering::SeqCst)
    }

    fn read(buffer: &HostBuffer) -> std::sync::RwLockReadGuard<'_, Vec<f32>> {
        buffer.data.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(buffer: &HostBuffer) -> std::sync::RwLockWriteGuard<'_, Vec<f32>> {
        buffer.data.write().unwrap_or_else(|p| p.into_inner())
    }

    fn run_job(&self, job: &TransformJob<'_, HostBuffer>, direction: Direction) -> Result<(), DeviceError> {
        let in_words = job.len * direction.input_kind().words();
        let out_words = job.len * direction.output_kind().words();

        let result = {
            let input = Self::read(job.input);
            if input.len() < in_words {
                return Err(DeviceError::BufferRange {
                    requested: in_words,
                    available: input.len(),
                });
            }
            match direction {
                Direction::Forward => {
                    let spectrum = self.fft.forward(&input[..in_words]);
                    bytemuck::cast_slice::<ComplexSample, f32>(&spectrum).to_vec()
                }
                Direction::Inverse => {
                    let bins: &[ComplexSample] = bytemuck::cast_slice(&input[..in_words]);
                    self.fft.inverse(bins)
                }
            }
        };

        let mut output = Self::write(job.output);
        if output.len() < out_words {
            return Err(DeviceError::BufferRange {
                requested: out_words,
                available: output.len(),
            });
        }
        output[..out_words].copy_from_slice(&result);
        Ok(())
    }
}

impl Accelerator for HostAccelerator {
    type Buffer = HostBuffer;
    type Stream = HostStream;
    type Program = HostProgram;

    fn label(&self) -> String {
        "host (rustfft)".to_string()
    }

    fn allocate(&self, words: usize) -> Result<HostBuffer, DeviceError> {
        if words == 0 {
            return Err(DeviceError::InvalidAllocation(
                "zero-length buffer".to_string(),
            ));
        }
        let bytes = (words * std::mem::size_of::<f32>()) as u64;
        let previous = self.in_use.fetch_add(bytes, Ordering::SeqCst);
        if previous.saturating_add(bytes) > self.memory_limit {
            self.in_use.fetch_sub(bytes, Ordering::SeqCst);
            return Err(DeviceError::OutOfMemory {
                requested: bytes,
                limit: self.memory_limit,
            });
        }

        Ok(HostBuffer {
            data: RwLock::new(vec![0.0; words]),
            bytes,
            in_use: self.in_use.clone(),
        })
    }

    fn upload(&self, buffer: &HostBuffer, data: &[f32]) -> Result<(), DeviceError> {
        let mut dst = Self::write(buffer);
        if data.len() > dst.len() {
            return Err(DeviceError::BufferRange {
                requested: data.len(),
                available: dst.len(),
            });
        }
        dst[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn download(&self, buffer: &HostBuffer, words: usize) -> Result<Vec<f32>, DeviceError> {
        let src = Self::read(buffer);
        if words > src.len() {
            return Err(DeviceError::BufferRange {
                requested: words,
                available: src.len(),
            });
        }
        Ok(src[..words].to_vec())
    }

    fn create_stream(&self, id: usize) -> Result<HostStream, DeviceError> {
        Ok(HostStream {
            id,
            launches: AtomicUsize::new(0),
        })
    }

    fn transform(
        &self,
        _stream: &HostStream,
        jobs: &[TransformJob<'_, HostBuffer>],
        direction: Direction,
    ) -> Result<(), DeviceError> {
        for job in jobs {
            self.run_job(job, direction)?;
        }
        Ok(())
    }

    fn compile(&self, name: &str, source: &str) -> Result<HostProgram, DeviceError> {
        if !source.contains(KERNEL_ENTRY_POINT) {
            return Err(DeviceError::Compile {
                name: name.to_string(),
                message: format!("source does not define entry point '{}'", KERNEL_ENTRY_POINT),
            });
        }
        let kernel = self
            .kernels
            .get(name)
            .copied()
            .ok_or_else(|| DeviceError::Compile {
                name: name.to_string(),
                message: "no native implementation registered".to_string(),
            })?;

        Ok(HostProgram {
            name: name.to_string(),
            kernel,
        })
    }

    fn launch(
        &self,
        stream: &HostStream,
        program: &HostProgram,
        input: &HostBuffer,
        output: &HostBuffer,
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
        stream.launches.fetch_add(1, Ordering::SeqCst);

        let src = Self::read(input);
        let mut dst = Self::write(output);
        let src_words = src.len() & !1;
        let dst_words = dst.len() & !1;
        let bins: &[ComplexSample] = bytemuck::cast_slice(&src[..src_words]);
        let out: &mut [ComplexSample] = bytemuck::cast_slice_mut(&mut dst[..dst_words]);

        (program.kernel)(bins, out, params)
            .map_err(|e| DeviceError::Launch(format!("{}: {}", program.name, e)))
    }

    fn synchronize(&self, _stream: &HostStream) -> Result<(), DeviceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_budget() {
        let host = HostAccelerator::new().with_memory_limit(1024);
        let a = host.allocate(128).unwrap();
        assert_eq!(host.bytes_in_use(), 512);
        assert!(matches!(
            host.allocate(256),
            Err(DeviceError::OutOfMemory { .. })
        ));
        drop(a);
        assert_eq!(host.bytes_in_use(), 0);
        assert!(host.allocate(256).is_ok());
    }

    #[test]
    fn test_zero_allocation_rejected() {
        let host = HostAccelerator::new();
        assert!(matches!(
            host.allocate(0),
            Err(DeviceError::InvalidAllocation(_))
        ));
    }

    #[test]
    fn test_compile_requires_native_kernel() {
        let host = HostAccelerator::new();
        let source = "@compute @workgroup_size(256) fn stretch() {}";
        assert!(host.compile("timestretch00", source).is_ok());
        assert!(matches!(
            host.compile("unknown", source),
            Err(DeviceError::Compile { .. })
        ));
        assert!(host.compile("timestretch00", "fn main() {}").is_err());
    }

    #[test]
    fn test_phase_rescale_identity_at_unit_factor() {
        let input = vec![ComplexSample::new(0.3, -0.4), ComplexSample::new(-1.0, 0.5)];
        let mut output = vec![ComplexSample::default(); 2];
        let params = StretchParams::new(2, 0, 44100, 1.0);
        phase_rescale(&input, &mut output, &params).unwrap();
        for (a, b) in input.iter().zip(&output) {
            assert!((a.re - b.re).abs() < 1e-6);
            assert!((a.im - b.im).abs() < 1e-6);
        }
    }

    #[test]
    fn test_launch_counts_on_stream() {
        let host = HostAccelerator::new();
        let stream = host.create_stream(3).unwrap();
        let program = host
            .compile("timestretch00", "fn stretch() {}")
            .unwrap();
        let input = host.allocate(512).unwrap();
        let output = host.allocate(512).unwrap();
        let params = StretchParams::new(256, 128, 44100, 1.0);
        host.launch(&stream, &program, &input, &output, &params, LaunchGeometry::for_frame(256))
            .unwrap();
        assert_eq!(stream.id(), 3);
        assert_eq!(stream.launches(), 1);
    }
}
