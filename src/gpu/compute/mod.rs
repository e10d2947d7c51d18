//! GPU compute passes for frame processing.
//!
//! FFT passes live here; stretch kernels are built by the wgpu accelerator
//! against the same bind group layout.

pub(crate) mod buffers;
pub(crate) mod params;
pub(crate) mod pipelines;

pub mod fft;

pub use fft::{GpuFft, GpuFftError};
