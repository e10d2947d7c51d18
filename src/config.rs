//! Pipeline configuration.
//!
//! Loaded from JSON or built in code; every field has a default, so a config
//! file only needs the values it changes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::{OverlapWindow, MIN_FRAME_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// How kernel launches are spread over execution streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StreamPolicy {
    /// Every launch on the default stream, each awaited before the next.
    Single,
    /// Frame `i` goes to stream `i % max_streams`, one host worker per stream.
    Interleaved { max_streams: usize },
}

impl Default for StreamPolicy {
    fn default() -> Self {
        StreamPolicy::Single
    }
}

impl StreamPolicy {
    pub fn streams(&self) -> usize {
        match self {
            StreamPolicy::Single => 1,
            StreamPolicy::Interleaved { max_streams } => *max_streams,
        }
    }
}

/// Diagnostics log settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Lines kept in memory; the oldest are dropped first.
    pub capacity: usize,
    /// Log file, truncated and headed on install.
    pub file: Option<PathBuf>,
    /// Collapse identical consecutive entries into one line with a count.
    pub aggregate: bool,
    /// Max level, as accepted by `log::LevelFilter`'s `FromStr`.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            file: None,
            aggregate: false,
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Samples per frame; a power of two, at least 128.
    pub frame_size: usize,
    /// Fraction of each frame shared with the next, in `[0, 1)`.
    pub overlap: f32,
    pub kernel: String,
    pub kernel_dir: PathBuf,
    /// Compiled kernel artifacts; defaults to `<kernel_dir>/compiled`.
    pub cache_dir: Option<PathBuf>,
    pub stream_policy: StreamPolicy,
    /// Submit all frames of a transform at once.
    pub batched: bool,
    /// Keep the group a track held before a call alive instead of freeing it.
    pub keep: bool,
    pub auto_pull: bool,
    pub auto_normalize: bool,
    pub window: OverlapWindow,
    pub log: LogConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_size: 16384,
            overlap: 0.5,
            kernel: "timestretch00".to_string(),
            kernel_dir: PathBuf::from("kernels"),
            cache_dir: None,
            stream_policy: StreamPolicy::Single,
            batched: true,
            keep: false,
            auto_pull: true,
            auto_normalize: false,
            window: OverlapWindow::default(),
            log: LogConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_size < MIN_FRAME_SIZE || !self.frame_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "frame_size must be a power of two >= {}, got {}",
                MIN_FRAME_SIZE, self.frame_size
            )));
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(ConfigError::Invalid(format!(
                "overlap must be in [0, 1), got {}",
                self.overlap
            )));
        }
        if self.stream_policy.streams() == 0 {
            return Err(ConfigError::Invalid("max_streams must be at least 1".to_string()));
        }
        if self.kernel.trim().is_empty() {
            return Err(ConfigError::Invalid("kernel name is empty".to_string()));
        }
        if self.log.capacity == 0 {
            return Err(ConfigError::Invalid("log capacity must be at least 1".to_string()));
        }
        if self.log.level.parse::<log::LevelFilter>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown log level '{}'",
                self.log.level
            )));
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.kernel_dir.join("compiled"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_dir(), PathBuf::from("kernels").join("compiled"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PipelineConfig::from_json(
            r#"{
                "frame_size": 2048,
                "stream_policy": { "mode": "interleaved", "max_streams": 4 },
                "window": "rectangular",
                "log": { "aggregate": true }
            }"#,
        )
        .unwrap();
        assert_eq!(config.frame_size, 2048);
        assert_eq!(config.overlap, 0.5);
        assert_eq!(config.stream_policy, StreamPolicy::Interleaved { max_streams: 4 });
        assert_eq!(config.window, OverlapWindow::Rectangular);
        assert!(config.log.aggregate);
        assert_eq!(config.log.capacity, 1024);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            r#"{ "frame_size": 100 }"#,
            r#"{ "frame_size": 64 }"#,
            r#"{ "overlap": 1.0 }"#,
            r#"{ "overlap": -0.1 }"#,
            r#"{ "stream_policy": { "mode": "interleaved", "max_streams": 0 } }"#,
            r#"{ "log": { "level": "loud" } }"#,
        ];
        for case in cases {
            assert!(
                matches!(PipelineConfig::from_json(case), Err(ConfigError::Invalid(_))),
                "accepted {}",
                case
            );
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{ "kernel": "timestretch01", "keep": true }"#).unwrap();
        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.kernel, "timestretch01");
        assert!(config.keep);

        assert!(matches!(
            PipelineConfig::from_json_file(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
