//! Error type shared by the registry, transform engine and executor.

use thiserror::Error;

use super::device::{DeviceError, ElementKind};
use super::kernels::KernelError;
use super::registry::MemoryHandle;

/// Coarse classification used by callers deciding how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Unknown kernel or handle.
    Resolution,
    /// Device out of memory or malformed allocation request.
    Allocation,
    /// Launch, transform or readback failure.
    Execution,
    /// Buffer element kind does not match the requested domain.
    DomainMismatch,
    /// Bad factor, frame size, overlap or empty input.
    InvalidInput,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Unknown memory handle {0}")]
    UnknownHandle(MemoryHandle),

    #[error("Handle {handle} holds {found:?} elements, expected {expected:?}")]
    DomainMismatch {
        handle: MemoryHandle,
        expected: ElementKind,
        found: ElementKind,
    },

    #[error("Cannot push an empty frame sequence")]
    EmptyInput,

    #[error("Frame {index} has length {len}; transforms need a power of two >= {min}")]
    InvalidFrameLength { index: usize, len: usize, min: usize },

    #[error("Stretch factor must be finite and positive, got {0}")]
    InvalidFactor(f64),

    #[error("Frame {index} has length {len}, expected {expected}")]
    FrameSizeMismatch {
        index: usize,
        len: usize,
        expected: usize,
    },

    #[error("Requested {0} streams; at least one is required")]
    InvalidStreamCount(usize),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ComputeError {
    pub fn kind(&self) -> ErrorClass {
        match self {
            ComputeError::UnknownHandle(_) | ComputeError::Kernel(_) => ErrorClass::Resolution,
            ComputeError::DomainMismatch { .. } => ErrorClass::DomainMismatch,
            ComputeError::EmptyInput
            | ComputeError::InvalidFrameLength { .. }
            | ComputeError::InvalidFactor(_)
            | ComputeError::FrameSizeMismatch { .. }
            | ComputeError::InvalidStreamCount(_) => ErrorClass::InvalidInput,
            ComputeError::Device(e) => match e {
                DeviceError::OutOfMemory { .. } | DeviceError::InvalidAllocation(_) => {
                    ErrorClass::Allocation
                }
                DeviceError::Compile { .. } => ErrorClass::Resolution,
                _ => ErrorClass::Execution,
            },
            ComputeError::Cancelled => ErrorClass::Cancelled,
        }
    }
}
