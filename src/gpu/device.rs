//! Accelerator abstraction shared by the registry, transforms and executor.
//!
//! An [`Accelerator`] owns raw device resources: storage buffers, execution
//! streams and compiled kernel programs. Everything above it (handle table,
//! transform sequencing, kernel caching) is backend independent, so the same
//! pipeline runs on wgpu ([`super::WgpuAccelerator`]) or on the CPU reference
//! backend ([`super::HostAccelerator`]).

use thiserror::Error;

pub use super::compute::params::StretchParams;

/// Entry point every stretch kernel must export.
pub const KERNEL_ENTRY_POINT: &str = "stretch";

/// Workgroup width every stretch kernel must declare.
pub const KERNEL_WORKGROUP_SIZE: u32 = 256;

/// Errors raised by an accelerator backend.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Allocation of {requested} bytes exceeds the device limit of {limit} bytes")]
    OutOfMemory { requested: u64, limit: u64 },

    #[error("Malformed allocation request: {0}")]
    InvalidAllocation(String),

    #[error("Buffer holds {available} words but {requested} were requested")]
    BufferRange { requested: usize, available: usize },

    #[error("GPU buffer mapping failed: {0}")]
    BufferMapFailed(String),

    #[error("Device poll failed: {0}")]
    Poll(String),

    #[error("Kernel '{name}' failed to build: {message}")]
    Compile { name: String, message: String },

    #[error("Kernel launch failed: {0}")]
    Launch(String),

    #[error("Transform failed: {0}")]
    Transform(String),
}

/// Element representation of a device buffer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// One `f32` per element (time-domain samples).
    Real,
    /// Two `f32` per element (frequency-domain bins).
    Complex,
}

impl ElementKind {
    /// `f32` words per element.
    pub fn words(self) -> usize {
        match self {
            ElementKind::Real => 1,
            ElementKind::Complex => 2,
        }
    }

    /// Bytes per element.
    pub fn size(self) -> usize {
        self.words() * std::mem::size_of::<f32>()
    }
}

/// A complex frequency bin as laid out in device memory (`vec2<f32>`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ComplexSample {
    pub re: f32,
    pub im: f32,
}

impl ComplexSample {
    pub fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }

    pub fn norm(self) -> f32 {
        self.re.hypot(self.im)
    }
}

impl From<rustfft::num_complex::Complex<f32>> for ComplexSample {
    fn from(c: rustfft::num_complex::Complex<f32>) -> Self {
        Self { re: c.re, im: c.im }
    }
}

impl From<ComplexSample> for rustfft::num_complex::Complex<f32> {
    fn from(c: ComplexSample) -> Self {
        Self::new(c.re, c.im)
    }
}

/// Host types that can be moved into and out of device buffer groups.
pub trait DeviceElement: bytemuck::Pod + Send + Sync {
    const KIND: ElementKind;
}

impl DeviceElement for f32 {
    const KIND: ElementKind = ElementKind::Real;
}

impl DeviceElement for ComplexSample {
    const KIND: ElementKind = ElementKind::Complex;
}

/// Transform direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Real samples to complex spectrum.
    Forward,
    /// Complex spectrum to real samples (real part, scaled by 1/n).
    Inverse,
}

impl Direction {
    /// Element kind the transform reads.
    pub fn input_kind(self) -> ElementKind {
        match self {
            Direction::Forward => ElementKind::Real,
            Direction::Inverse => ElementKind::Complex,
        }
    }

    /// Element kind the transform writes.
    pub fn output_kind(self) -> ElementKind {
        match self {
            Direction::Forward => ElementKind::Complex,
            Direction::Inverse => ElementKind::Real,
        }
    }
}

/// One frame of a transform submission.
pub struct TransformJob<'a, B> {
    pub input: &'a B,
    pub output: &'a B,
    /// Elements in the frame (a power of two).
    pub len: usize,
}

/// Workgroup counts for one kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl LaunchGeometry {
    /// One launch covers one frame; each invocation handles one bin.
    pub fn for_frame(len: usize) -> Self {
        Self {
            x: (len as u32).div_ceil(KERNEL_WORKGROUP_SIZE),
            y: 1,
            z: 1,
        }
    }

    /// Total invocations the geometry spans.
    pub fn invocations(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64 * KERNEL_WORKGROUP_SIZE as u64
    }
}

/// Raw device operations the pipeline is built on.
///
/// Buffers are sized in `f32` words. Work submitted on one stream completes in
/// submission order; [`Accelerator::synchronize`] blocks until everything
/// submitted on the stream has finished.
pub trait Accelerator: Send + Sync + 'static {
    type Buffer: Send + Sync + 'static;
    type Stream: Send + Sync + 'static;
    type Program: Send + Sync + 'static;

    /// Human-readable backend / adapter name.
    fn label(&self) -> String;

    /// Allocate a zero-initialized buffer of `words` `f32`s.
    fn allocate(&self, words: usize) -> Result<Self::Buffer, DeviceError>;

    fn upload(&self, buffer: &Self::Buffer, data: &[f32]) -> Result<(), DeviceError>;

    /// Read the first `words` `f32`s back to the host. Waits for pending work.
    fn download(&self, buffer: &Self::Buffer, words: usize) -> Result<Vec<f32>, DeviceError>;

    fn create_stream(&self, id: usize) -> Result<Self::Stream, DeviceError>;

    /// Submit FFTs for every job as a single submission on `stream`.
    fn transform(
        &self,
        stream: &Self::Stream,
        jobs: &[TransformJob<'_, Self::Buffer>],
        direction: Direction,
    ) -> Result<(), DeviceError>;

    /// Validate and build a stretch kernel from source.
    fn compile(&self, name: &str, source: &str) -> Result<Self::Program, DeviceError>;

    /// Queue one kernel launch on `stream`.
    fn launch(
        &self,
        stream: &Self::Stream,
        program: &Self::Program,
        input: &Self::Buffer,
        output: &Self::Buffer,
        params: &StretchParams,
        geometry: LaunchGeometry,
    ) -> Result<(), DeviceError>;

    fn synchronize(&self, stream: &Self::Stream) -> Result<(), DeviceError>;
}
