//! Host-side audio: tracks, framing and the CPU FFT.
//!
//! This module provides:
//! - `AudioTrack`, the unit the pipeline operates on, and `TrackCollection`
//! - Frame segmentation and weighted overlap-add reconstruction
//! - Frame FFT via RustFFT (used by the host accelerator)
//! - Synthetic test signals

pub mod collection;
pub mod fft;
pub mod frames;
pub mod synth;
pub mod track;

// Re-export commonly used types
pub use collection::{TrackCollection, TrackCommand};
pub use fft::FrameFft;
pub use frames::{
    overlap_size, reconstruct, segment, FrameError, FrameLayout, FrameSet, OverlapWindow,
    MIN_FRAME_SIZE,
};
pub use synth::{generate_chirp, generate_sine, generate_white_noise};
pub use track::{AudioTrack, Domain, Payload, StageMetrics, TrackId};
