//! Per-call options for the facade, derived from [`PipelineConfig`].

use crate::audio::OverlapWindow;
use crate::config::{PipelineConfig, StreamPolicy};

/// Options for a domain toggle or a residency move.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOptions {
    /// Frame size used when the track has to be pushed first.
    pub frame_size: usize,
    pub overlap: f32,
    pub batched: bool,
    /// Retain the device group the track held before the call.
    pub keep: bool,
    /// Pull the result back to the host when it is time-domain.
    pub auto_pull: bool,
    /// Normalize to unit peak after an automatic pull.
    pub auto_normalize: bool,
    pub window: OverlapWindow,
}

impl TransformOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            frame_size: config.frame_size,
            overlap: config.overlap,
            batched: config.batched,
            keep: config.keep,
            auto_pull: config.auto_pull,
            auto_normalize: config.auto_normalize,
            window: config.window,
        }
    }
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Options for a time-stretch.
#[derive(Debug, Clone, PartialEq)]
pub struct StretchOptions {
    pub kernel: String,
    pub factor: f64,
    pub frame_size: usize,
    pub overlap: f32,
    pub policy: StreamPolicy,
    pub batched: bool,
    pub keep: bool,
    pub auto_pull: bool,
    pub auto_normalize: bool,
    pub window: OverlapWindow,
}

impl StretchOptions {
    pub fn from_config(config: &PipelineConfig, factor: f64) -> Self {
        Self {
            kernel: config.kernel.clone(),
            factor,
            frame_size: config.frame_size,
            overlap: config.overlap,
            policy: config.stream_policy,
            batched: config.batched,
            keep: config.keep,
            auto_pull: config.auto_pull,
            auto_normalize: config.auto_normalize,
            window: config.window,
        }
    }

    pub(crate) fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            frame_size: self.frame_size,
            overlap: self.overlap,
            batched: self.batched,
            keep: self.keep,
            auto_pull: self.auto_pull,
            auto_normalize: self.auto_normalize,
            window: self.window,
        }
    }
}

impl Default for StretchOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default(), 1.0)
    }
}
