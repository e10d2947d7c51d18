//! Diagnostics: a bounded in-memory log with an optional file sink, and the
//! stage-timing sink the pipeline reports to.
//!
//! Components only ever call the `log` macros. Nothing is recorded until a
//! [`LogRing`] (or any other `log` backend) is installed, so tests run with a
//! silent no-op logger by default.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::config::LogConfig;

/// Receives per-stage timings from the pipeline.
pub trait MetricsSink: Send + Sync {
    fn record(&self, track: &str, stage: &str, millis: f64);
}

/// Drops every timing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _track: &str, _stage: &str, _millis: f64) {}
}

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    line: String,
    count: usize,
}

impl Entry {
    fn render(&self) -> String {
        if self.count > 1 {
            format!("{} (x{})", self.line, self.count)
        } else {
            self.line.clone()
        }
    }
}

struct RingState {
    entries: Mutex<VecDeque<Entry>>,
    capacity: usize,
    aggregate: bool,
    level: LevelFilter,
    file: Option<Mutex<File>>,
    console: Option<env_logger::Logger>,
}

/// Bounded ring of formatted log lines. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LogRing {
    state: Arc<RingState>,
}

impl LogRing {
    /// Build a ring from config. A configured log file is truncated and
    /// started with a header line.
    pub fn new(config: &LogConfig) -> std::io::Result<Self> {
        Self::build(config, None)
    }

    /// Also echo records to stderr through `env_logger` (honours `RUST_LOG`).
    pub fn with_console(config: &LogConfig) -> std::io::Result<Self> {
        let console = env_logger::Builder::new()
            .filter_level(parse_level(config))
            .parse_default_env()
            .build();
        Self::build(config, Some(console))
    }

    fn build(config: &LogConfig, console: Option<env_logger::Logger>) -> std::io::Result<Self> {
        let file = match &config.file {
            Some(path) => Some(Mutex::new(create_log_file(path)?)),
            None => None,
        };

        Ok(Self {
            state: Arc::new(RingState {
                entries: Mutex::new(VecDeque::with_capacity(config.capacity.min(4096))),
                capacity: config.capacity.max(1),
                aggregate: config.aggregate,
                level: parse_level(config),
                file,
                console,
            }),
        })
    }

    /// Install as the process-wide `log` backend.
    pub fn install(&self) -> Result<(), log::SetLoggerError> {
        log::set_boxed_logger(Box::new(self.clone()))?;
        log::set_max_level(self.max_level());
        Ok(())
    }

    pub fn max_level(&self) -> LevelFilter {
        match &self.state.console {
            Some(console) => console.filter().max(self.state.level),
            None => self.state.level,
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Append one entry. Returns the line as stored.
    pub fn push(&self, level: Level, target: &str, message: &str) -> String {
        let key = format!("{} {}: {}", level, target, message);
        let line = format!("[{}] {}", timestamp(), key);

        let rendered = {
            let mut entries = self.lock();
            let repeated = self.state.aggregate && entries.back().is_some_and(|last| last.key == key);
            match entries.back_mut() {
                Some(last) if repeated => {
                    last.count += 1;
                    last.line = line;
                    last.render()
                }
                _ => {
                    if entries.len() == self.state.capacity {
                        entries.pop_front();
                    }
                    let entry = Entry {
                        key,
                        line,
                        count: 1,
                    };
                    let rendered = entry.render();
                    entries.push_back(entry);
                    rendered
                }
            }
        };

        if let Some(file) = &self.state.file {
            let mut file = file.lock().unwrap_or_else(|p| p.into_inner());
            // Write errors are dropped; the ring still holds the line.
            let _ = writeln!(file, "{}", rendered);
        }
        rendered
    }

    /// Stored lines, oldest first.
    pub fn entries(&self) -> Vec<String> {
        self.lock().iter().map(Entry::render).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Entry>> {
        self.state.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Log for LogRing {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.state.level
            || self
                .state
                .console
                .as_ref()
                .is_some_and(|c| c.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        if let Some(console) = &self.state.console {
            if console.matches(record) {
                console.log(record);
            }
        }
        if record.level() <= self.state.level {
            self.push(record.level(), record.target(), &record.args().to_string());
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.state.file {
            let _ = file.lock().unwrap_or_else(|p| p.into_inner()).flush();
        }
    }
}

impl MetricsSink for LogRing {
    fn record(&self, track: &str, stage: &str, millis: f64) {
        self.push(
            Level::Debug,
            "metrics",
            &format!("{} {} {:.3} ms", track, stage, millis),
        );
    }
}

fn parse_level(config: &LogConfig) -> LevelFilter {
    config.level.parse().unwrap_or(LevelFilter::Info)
}

fn create_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    writeln!(
        file,
        "# {} {} log, started {} UTC",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        timestamp()
    )?;
    Ok(file)
}

/// Wall-clock `HH:MM:SS.mmm` (UTC).
fn timestamp() -> String {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let millis = elapsed.as_millis() % 86_400_000;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        millis / 3_600_000,
        millis / 60_000 % 60,
        millis / 1000 % 60,
        millis % 1000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: usize, aggregate: bool) -> LogConfig {
        LogConfig {
            capacity,
            aggregate,
            ..LogConfig::default()
        }
    }

    #[test]
    fn test_ring_drops_oldest() {
        let ring = LogRing::new(&config(3, false)).unwrap();
        for i in 0..5 {
            ring.push(Level::Info, "test", &format!("line {}", i));
        }
        let entries = ring.entries();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].ends_with("line 2"));
        assert!(entries[2].ends_with("line 4"));
    }

    #[test]
    fn test_aggregate_identical_entries() {
        let ring = LogRing::new(&config(8, true)).unwrap();
        ring.push(Level::Warn, "gpu", "retry");
        ring.push(Level::Warn, "gpu", "retry");
        ring.push(Level::Warn, "gpu", "retry");
        ring.push(Level::Warn, "gpu", "done");
        let entries = ring.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].ends_with("retry (x3)"));
    }

    #[test]
    fn test_file_sink_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("stretch.log");
        let ring = LogRing::new(&LogConfig {
            file: Some(path.clone()),
            ..LogConfig::default()
        })
        .unwrap();
        ring.push(Level::Info, "pipeline", "hello");
        ring.flush();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("# "));
        assert!(lines.next().unwrap().ends_with("INFO pipeline: hello"));
    }

    #[test]
    fn test_level_filter() {
        let ring = LogRing::new(&LogConfig {
            level: "warn".to_string(),
            ..LogConfig::default()
        })
        .unwrap();
        ring.log(
            &Record::builder()
                .level(Level::Debug)
                .target("x")
                .args(format_args!("quiet"))
                .build(),
        );
        assert!(ring.is_empty());
        assert_eq!(ring.max_level(), LevelFilter::Warn);
    }

    #[test]
    fn test_timestamp_shape() {
        let ts = timestamp();
        assert_eq!(ts.len(), 12);
        assert_eq!(&ts[2..3], ":");
        assert_eq!(&ts[8..9], ".");
    }
}
