//! Device-side compute using wgpu.
//!
//! Provides the [`Accelerator`] abstraction with a wgpu backend (Metal on
//! macOS, Vulkan/DX12 elsewhere) and a CPU reference backend, plus the
//! backend-independent layers built on top of it: the handle registry,
//! batched spectral transforms, the kernel loader and the time-stretch
//! executor.

pub mod compute;
pub mod context;
pub mod device;
pub mod error;
pub mod executor;
pub mod host;
pub mod kernels;
pub mod registry;
pub mod spectral;
pub mod wgpu_device;

pub use compute::{GpuFft, GpuFftError};
pub use context::{ContextOptions, GpuContext, GpuError};
pub use device::{
    Accelerator, ComplexSample, DeviceElement, DeviceError, Direction, ElementKind,
    LaunchGeometry, StretchParams, TransformJob, KERNEL_ENTRY_POINT, KERNEL_WORKGROUP_SIZE,
};
pub use error::{ComputeError, ErrorClass};
pub use executor::{check_factor, StretchRequest, TimeStretchExecutor};
pub use host::HostAccelerator;
pub use kernels::{KernelError, KernelLoader, KernelProgram, KERNEL_EXTENSION};
pub use registry::{DeviceRegistry, ExecStream, GroupInfo, MemoryHandle};
pub use spectral::{SpectralEngine, MIN_TRANSFORM_LEN};
pub use wgpu_device::{validate_kernel, WgpuAccelerator};
