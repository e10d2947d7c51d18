//! Phobz Stretch Core
//!
//! GPU-accelerated audio time-stretching.
//!
//! # Features
//!
//! - Frame segmentation and weighted overlap-add reconstruction
//! - Handle-based device memory registry with pooled execution streams
//! - Batched forward/inverse FFT on the device (wgpu compute) or host (RustFFT)
//! - WGSL stretch kernels resolved by name, validated and cached on disk
//! - Single-stream or interleaved multi-stream kernel dispatch
//! - A track-level facade with rollback, stage timings and async variants
//!
//! ```no_run
//! use phobz_stretch::{AudioTrack, HostAccelerator, PipelineConfig, StretchService};
//!
//! let service = StretchService::new(HostAccelerator::new(), PipelineConfig::default())?;
//! let mut track = AudioTrack::new("tone", phobz_stretch::audio::generate_sine(440.0, 44_100, 2.0, 0.8), 44_100, 1);
//! service.stretch(&mut track, &service.stretch_options(1.5))?;
//! # Ok::<(), phobz_stretch::PipelineError>(())
//! ```

pub mod audio;
pub mod config;
pub mod diagnostics;
pub mod gpu;
pub mod pipeline;

// Re-export commonly used types
pub use audio::{
    reconstruct, segment, AudioTrack, Domain, FrameLayout, FrameSet, OverlapWindow, Payload,
    TrackCollection, TrackCommand, TrackId,
};
pub use config::{ConfigError, LogConfig, PipelineConfig, StreamPolicy};
pub use diagnostics::{LogRing, MetricsSink, NoopMetrics};
pub use gpu::{
    Accelerator, ComplexSample, ComputeError, DeviceRegistry, ErrorClass, HostAccelerator,
    KernelLoader, MemoryHandle, WgpuAccelerator,
};
pub use pipeline::{PipelineError, StretchOptions, StretchService, TransformOptions};
pub use tokio_util::sync::CancellationToken;
