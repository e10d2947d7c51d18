//! Audio track: samples plus where they currently live.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::frames::{FrameLayout, FrameSet};
use crate::gpu::{ComplexSample, ElementKind, MemoryHandle};

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a track, independent of its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track#{}", self.0)
    }
}

/// Representation of the data: samples over time or frequency bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Time,
    Frequency,
}

impl Domain {
    pub fn element_kind(self) -> ElementKind {
        match self {
            Domain::Time => ElementKind::Real,
            Domain::Frequency => ElementKind::Complex,
        }
    }

    pub fn from_kind(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Real => Domain::Time,
            ElementKind::Complex => Domain::Frequency,
        }
    }
}

/// Where a track's data lives and in which form.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Interleaved samples on the host.
    Samples(Vec<f32>),
    /// Frequency frames pulled back to the host.
    Spectrum(FrameSet<ComplexSample>),
    /// A device buffer group plus the layout needed to reassemble it.
    Device {
        handle: MemoryHandle,
        layout: FrameLayout,
        domain: Domain,
    },
}

/// Elapsed milliseconds per pipeline stage, in first-recorded order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageMetrics {
    entries: Vec<(String, f64)>,
}

impl StageMetrics {
    /// Record a stage timing, replacing any earlier value for the stage.
    pub fn record(&mut self, stage: &str, millis: f64) {
        match self.entries.iter_mut().find(|(name, _)| name == stage) {
            Some(entry) => entry.1 = millis,
            None => self.entries.push((stage.to_string(), millis)),
        }
    }

    pub fn get(&self, stage: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, ms)| *ms)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(name, ms)| (name.as_str(), *ms))
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|(_, ms)| ms).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Display for StageMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (stage, ms)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {:.3} ms", stage, ms)?;
        }
        Ok(())
    }
}

/// A named piece of audio handed to the pipeline.
///
/// The pipeline borrows a track for the length of one call and updates its
/// payload in place; it never keeps a reference afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    id: TrackId,
    pub name: String,
    payload: Payload,
    sample_rate: u32,
    channels: u16,
    stretch_factor: f64,
    processing: bool,
    metrics: StageMetrics,
}

impl AudioTrack {
    pub fn new(name: impl Into<String>, samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            id: TrackId(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            payload: Payload::Samples(samples),
            sample_rate,
            channels: channels.max(1),
            stretch_factor: 1.0,
            processing: false,
            metrics: StageMetrics::default(),
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Factor of the last successful stretch (1.0 if never stretched).
    pub fn stretch_factor(&self) -> f64 {
        self.stretch_factor
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn domain(&self) -> Domain {
        match &self.payload {
            Payload::Samples(_) => Domain::Time,
            Payload::Spectrum(_) => Domain::Frequency,
            Payload::Device { domain, .. } => *domain,
        }
    }

    pub fn is_on_host(&self) -> bool {
        !self.is_on_device()
    }

    pub fn is_on_device(&self) -> bool {
        matches!(self.payload, Payload::Device { .. })
    }

    pub fn device_handle(&self) -> Option<MemoryHandle> {
        match &self.payload {
            Payload::Device { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    pub fn layout(&self) -> Option<&FrameLayout> {
        match &self.payload {
            Payload::Device { layout, .. } => Some(layout),
            Payload::Spectrum(set) => Some(&set.layout),
            Payload::Samples(_) => None,
        }
    }

    /// Host samples, if the track is time-domain on the host.
    pub fn samples(&self) -> Option<&[f32]> {
        match &self.payload {
            Payload::Samples(samples) => Some(samples),
            _ => None,
        }
    }

    /// Sample count of the data once it is back on the host in time domain.
    pub fn len(&self) -> usize {
        match &self.payload {
            Payload::Samples(samples) => samples.len(),
            Payload::Spectrum(set) => set.layout.target_len,
            Payload::Device { layout, .. } => layout.target_len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }

    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    /// One-line summary of the recorded stage timings.
    pub fn metrics_string(&self) -> String {
        if self.metrics.is_empty() {
            return format!("{}: no timings", self.name);
        }
        format!(
            "{}: {} (total {:.3} ms)",
            self.name,
            self.metrics,
            self.metrics.total()
        )
    }

    /// Scale host samples so the loudest one reaches `peak`.
    ///
    /// Returns false (and changes nothing) when the track is not host
    /// time-domain data or is silent.
    pub fn normalize(&mut self, peak: f32) -> bool {
        let Payload::Samples(samples) = &mut self.payload else {
            return false;
        };
        let max = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        if max <= f32::EPSILON || !peak.is_finite() {
            return false;
        }
        let gain = peak / max;
        for s in samples.iter_mut() {
            *s *= gain;
        }
        true
    }

    /// Ask the owning collection to drop this track.
    pub fn request_removal(&self) -> super::TrackCommand {
        super::TrackCommand::Remove(self.id)
    }

    pub(crate) fn set_payload(&mut self, payload: Payload) {
        self.payload = payload;
    }

    pub(crate) fn set_stretch_factor(&mut self, factor: f64) {
        self.stretch_factor = factor;
    }

    pub(crate) fn set_processing(&mut self, processing: bool) {
        self.processing = processing;
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut StageMetrics {
        &mut self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_track_is_host_time() {
        let track = AudioTrack::new("a", vec![0.0; 88_200], 44_100, 2);
        assert!(track.is_on_host());
        assert_eq!(track.domain(), Domain::Time);
        assert_eq!(track.len(), 88_200);
        assert!((track.duration_secs() - 1.0).abs() < 1e-9);
        assert_eq!(track.stretch_factor(), 1.0);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = AudioTrack::new("a", vec![], 44_100, 1);
        let b = AudioTrack::new("a", vec![], 44_100, 1);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_normalize() {
        let mut track = AudioTrack::new("n", vec![0.1, -0.25, 0.2], 44_100, 1);
        assert!(track.normalize(1.0));
        let samples = track.samples().unwrap();
        assert!((samples[1] + 1.0).abs() < 1e-6);
        assert!((samples[0] - 0.4).abs() < 1e-6);

        let mut silent = AudioTrack::new("s", vec![0.0; 4], 44_100, 1);
        assert!(!silent.normalize(1.0));
    }

    #[test]
    fn test_metrics_replace_and_format() {
        let mut track = AudioTrack::new("m", vec![], 44_100, 1);
        assert_eq!(track.metrics_string(), "m: no timings");
        track.metrics_mut().record("push", 2.0);
        track.metrics_mut().record("chunk", 1.0);
        track.metrics_mut().record("push", 3.0);
        assert_eq!(track.metrics().get("push"), Some(3.0));
        assert_eq!(
            track.metrics_string(),
            "m: push: 3.000 ms, chunk: 1.000 ms (total 4.000 ms)"
        );
    }

    #[test]
    fn test_domain_kind_mapping() {
        assert_eq!(Domain::Time.element_kind(), ElementKind::Real);
        assert_eq!(Domain::from_kind(ElementKind::Complex), Domain::Frequency);
    }
}
