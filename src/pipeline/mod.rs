//! Orchestration facade: moves tracks between host and device, toggles their
//! domain and time-stretches them.
//!
//! Every entry point borrows the caller's [`AudioTrack`] for the duration of
//! the call. On success the track's payload is replaced; on failure every
//! device group the call created is freed and the track is restored exactly
//! as it was. Stage timings land in the track's metrics and in the injected
//! [`MetricsSink`].

mod options;
mod staging;

pub use options::{StretchOptions, TransformOptions};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::audio::{reconstruct, segment, AudioTrack, Domain, FrameError, FrameSet, OverlapWindow, Payload};
use crate::config::{ConfigError, PipelineConfig};
use crate::diagnostics::{MetricsSink, NoopMetrics};
use crate::gpu::{
    check_factor, Accelerator, ComplexSample, ComputeError, DeviceRegistry, Direction, ErrorClass,
    KernelError, KernelLoader, MemoryHandle, SpectralEngine, StretchRequest, TimeStretchExecutor,
};
use staging::Staging;

/// Errors that can occur during pipeline execution.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("Track '{0}' holds no audio")]
    EmptyTrack(String),
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorClass {
        match self {
            PipelineError::Config(_) | PipelineError::EmptyTrack(_) => ErrorClass::InvalidInput,
            PipelineError::Frame(_) => ErrorClass::InvalidInput,
            PipelineError::Compute(e) => e.kind(),
            PipelineError::Kernel(_) => ErrorClass::Resolution,
            PipelineError::Join(e) if e.is_cancelled() => ErrorClass::Cancelled,
            PipelineError::Join(_) => ErrorClass::Execution,
        }
    }
}

struct ServiceInner<A: Accelerator> {
    registry: Arc<DeviceRegistry<A>>,
    spectral: SpectralEngine<A>,
    kernels: Arc<KernelLoader<A>>,
    executor: TimeStretchExecutor<A>,
    config: PipelineConfig,
    metrics: Arc<dyn MetricsSink>,
}

/// The pipeline entry point. Cheap to clone; clones share one registry and
/// kernel cache.
pub struct StretchService<A: Accelerator> {
    inner: Arc<ServiceInner<A>>,
}

impl<A: Accelerator> Clone for StretchService<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: Accelerator> StretchService<A> {
    pub fn new(accelerator: A, config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::with_metrics(accelerator, config, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(
        accelerator: A,
        config: PipelineConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let accelerator = Arc::new(accelerator);
        let registry = Arc::new(DeviceRegistry::new(
            accelerator.clone(),
            config.stream_policy.streams(),
        ));
        let kernels = Arc::new(KernelLoader::new(
            accelerator.clone(),
            config.kernel_dir.clone(),
            config.cache_dir(),
        ));

        log::info!(
            "Stretch service on {} (kernels in {})",
            accelerator.label(),
            config.kernel_dir.display()
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                spectral: SpectralEngine::new(registry.clone()),
                executor: TimeStretchExecutor::new(registry.clone(), kernels.clone()),
                registry,
                kernels,
                config,
                metrics,
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry<A>> {
        &self.inner.registry
    }

    pub fn kernels(&self) -> &Arc<KernelLoader<A>> {
        &self.inner.kernels
    }

    pub fn transform_options(&self) -> TransformOptions {
        TransformOptions::from_config(&self.inner.config)
    }

    pub fn stretch_options(&self, factor: f64) -> StretchOptions {
        StretchOptions::from_config(&self.inner.config, factor)
    }

    // --- Kernels ---

    pub fn available_kernels(&self, filter: Option<&str>) -> Result<Vec<String>, PipelineError> {
        Ok(self.inner.kernels.available_kernels(filter)?)
    }

    pub fn latest_kernel(&self) -> Result<Option<String>, PipelineError> {
        Ok(self.inner.kernels.latest_kernel()?)
    }

    pub fn compile_kernel(&self, name_or_path: &str) -> Result<PathBuf, PipelineError> {
        Ok(self.inner.kernels.compile(name_or_path)?)
    }

    // --- Residency ---

    /// Segment and push a host track. A track already on the device is left
    /// alone. Returns the device handle.
    pub fn move_to_device(
        &self,
        track: &mut AudioTrack,
        frame_size: usize,
        overlap: f32,
    ) -> Result<MemoryHandle, PipelineError> {
        self.guarded(track, "move_to_device", false, |service, track, staging| {
            service.push_track(track, frame_size, overlap, staging)?;
            device_handle(track)
        })
    }

    /// Pull a device track back to the host, reassembling time-domain frames.
    pub fn move_to_host(
        &self,
        track: &mut AudioTrack,
        keep: bool,
        window: OverlapWindow,
    ) -> Result<(), PipelineError> {
        self.guarded(track, "move_to_host", keep, |service, track, staging| {
            service.pull_track(track, window, staging)
        })
    }

    /// Toggle residency: host tracks are pushed, device tracks are pulled.
    pub fn move_audio(&self, track: &mut AudioTrack, options: &TransformOptions) -> Result<(), PipelineError> {
        self.guarded(track, "move_audio", options.keep, |service, track, staging| {
            if track.is_on_device() {
                service.pull_track(track, options.window, staging)
            } else {
                service.push_track(track, options.frame_size, options.overlap, staging)
            }
        })
    }

    // --- Transforms ---

    /// Toggle the track between time and frequency domain on the device.
    pub fn transform(&self, track: &mut AudioTrack, options: &TransformOptions) -> Result<(), PipelineError> {
        self.guarded(track, "transform", options.keep, |service, track, staging| {
            service.push_track(track, options.frame_size, options.overlap, staging)?;
            let Payload::Device { handle, layout, domain } = track.payload().clone() else {
                return Err(PipelineError::EmptyTrack(track.name.clone()));
            };

            let (direction, stage, target) = match domain {
                Domain::Time => (Direction::Forward, "fft", Domain::Frequency),
                Domain::Frequency => (Direction::Inverse, "ifft", Domain::Time),
            };
            let started = Instant::now();
            let output = service
                .inner
                .spectral
                .transform(handle, direction, options.batched, true)?;
            staging.created(output);
            staging.superseded(handle);
            service.record(track, stage, started);
            track.set_payload(Payload::Device {
                handle: output,
                layout,
                domain: target,
            });

            service.finish(track, options, staging)
        })
    }

    /// Time-stretch the track by `options.factor` with the named kernel.
    pub fn stretch(&self, track: &mut AudioTrack, options: &StretchOptions) -> Result<(), PipelineError> {
        self.stretch_with(track, options, &CancellationToken::new())
    }

    /// As [`Self::stretch`], stopping before the next kernel launch once
    /// `cancel` fires.
    pub fn stretch_with(
        &self,
        track: &mut AudioTrack,
        options: &StretchOptions,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        self.guarded(track, "stretch", options.keep, |service, track, staging| {
            check_factor(options.factor)?;
            service.push_track(track, options.frame_size, options.overlap, staging)?;
            let Payload::Device { handle, layout, domain } = track.payload().clone() else {
                return Err(PipelineError::EmptyTrack(track.name.clone()));
            };
            let stretched = layout.stretched(options.factor)?;

            let request = StretchRequest {
                kernel: options.kernel.clone(),
                factor: options.factor,
                frame_size: layout.frame_size,
                overlap_size: layout.overlap_size(),
                sample_rate: track.sample_rate(),
                policy: options.policy,
                batched: options.batched,
                keep: true,
            };
            let started = Instant::now();
            let output = service.inner.executor.run(handle, &request, cancel)?;
            staging.created(output);
            staging.superseded(handle);
            service.record(track, "stretch", started);

            track.set_payload(Payload::Device {
                handle: output,
                layout: stretched,
                domain,
            });
            track.set_stretch_factor(options.factor);

            service.finish(track, &options.transform_options(), staging)
        })
    }

    // --- Async ---

    /// [`Self::transform`] on tokio's blocking pool.
    pub async fn transform_async(
        &self,
        track: &mut AudioTrack,
        options: TransformOptions,
    ) -> Result<(), PipelineError> {
        self.offload(track, move |service, working| service.transform(working, &options))
            .await
    }

    /// [`Self::move_audio`] on tokio's blocking pool.
    pub async fn move_audio_async(
        &self,
        track: &mut AudioTrack,
        options: TransformOptions,
    ) -> Result<(), PipelineError> {
        self.offload(track, move |service, working| service.move_audio(working, &options))
            .await
    }

    /// [`Self::stretch_with`] on tokio's blocking pool.
    pub async fn stretch_async(
        &self,
        track: &mut AudioTrack,
        options: StretchOptions,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        self.offload(track, move |service, working| {
            service.stretch_with(working, &options, &cancel)
        })
        .await
    }

    /// Free the track's device group, if any, leaving it empty on the host.
    /// Returns whether a group was released.
    pub fn release(&self, track: &mut AudioTrack) -> bool {
        let Some(handle) = track.device_handle() else {
            return false;
        };
        if let Err(e) = self.inner.registry.free(handle) {
            log::warn!("Releasing '{}': {}", track.name, e);
        }
        track.set_payload(Payload::Samples(Vec::new()));
        true
    }

    // --- Private helpers ---

    /// Run `op` against `track` with rollback on failure.
    fn guarded<T>(
        &self,
        track: &mut AudioTrack,
        operation: &str,
        keep: bool,
        op: impl FnOnce(&Self, &mut AudioTrack, &mut Staging) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let snapshot = track.clone();
        let mut staging = Staging::default();

        track.set_processing(true);
        match op(self, track, &mut staging) {
            Ok(value) => {
                staging.commit(&self.inner.registry, track.device_handle(), keep);
                track.set_processing(false);
                Ok(value)
            }
            Err(e) => {
                staging.rollback(&self.inner.registry);
                *track = snapshot;
                log::error!("{} of '{}' failed: {}", operation, track.name, e);
                Err(e)
            }
        }
    }

    async fn offload<F>(&self, track: &mut AudioTrack, op: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&Self, &mut AudioTrack) -> Result<(), PipelineError> + Send + 'static,
    {
        let service = self.clone();
        let mut working = track.clone();
        let (working, result) = tokio::task::spawn_blocking(move || {
            let result = op(&service, &mut working);
            (working, result)
        })
        .await?;

        result?;
        *track = working;
        Ok(())
    }

    fn push_track(
        &self,
        track: &mut AudioTrack,
        frame_size: usize,
        overlap: f32,
        staging: &mut Staging,
    ) -> Result<(), PipelineError> {
        let started = Instant::now();
        let (handle, layout, domain) = match track.payload() {
            Payload::Device { .. } => return Ok(()),
            Payload::Samples(samples) => {
                if samples.is_empty() {
                    return Err(PipelineError::EmptyTrack(track.name.clone()));
                }
                let set = segment(samples, frame_size, overlap)?;
                self.record(track, "chunk", started);

                let started = Instant::now();
                let handle = self.inner.registry.push(&set.frames)?;
                staging.created(handle);
                self.record(track, "push", started);
                (handle, set.layout, Domain::Time)
            }
            Payload::Spectrum(set) => {
                let layout = set.layout;
                let handle = self.inner.registry.push(&set.frames)?;
                staging.created(handle);
                self.record(track, "push", started);
                (handle, layout, Domain::Frequency)
            }
        };

        track.set_payload(Payload::Device {
            handle,
            layout,
            domain,
        });
        Ok(())
    }

    fn pull_track(
        &self,
        track: &mut AudioTrack,
        window: OverlapWindow,
        staging: &mut Staging,
    ) -> Result<(), PipelineError> {
        let Payload::Device { handle, layout, domain } = track.payload().clone() else {
            return Ok(());
        };

        let started = Instant::now();
        let payload = match domain {
            Domain::Time => {
                let frames = self.inner.registry.pull::<f32>(handle, true)?;
                self.record(track, "pull", started);

                let started = Instant::now();
                let samples = reconstruct(&FrameSet { frames, layout }, window)?;
                self.record(track, "aggregate", started);
                Payload::Samples(samples)
            }
            Domain::Frequency => {
                let frames = self.inner.registry.pull::<ComplexSample>(handle, true)?;
                self.record(track, "pull", started);
                Payload::Spectrum(FrameSet { frames, layout })
            }
        };

        staging.superseded(handle);
        track.set_payload(payload);
        Ok(())
    }

    /// Optional pull and normalize once a result is time-domain.
    fn finish(
        &self,
        track: &mut AudioTrack,
        options: &TransformOptions,
        staging: &mut Staging,
    ) -> Result<(), PipelineError> {
        if !options.auto_pull || track.domain() != Domain::Time {
            return Ok(());
        }
        self.pull_track(track, options.window, staging)?;

        if options.auto_normalize {
            let started = Instant::now();
            track.normalize(1.0);
            self.record(track, "normalize", started);
        }
        Ok(())
    }

    fn record(&self, track: &mut AudioTrack, stage: &str, started: Instant) {
        let millis = started.elapsed().as_secs_f64() * 1000.0;
        track.metrics_mut().record(stage, millis);
        self.inner.metrics.record(&track.name, stage, millis);
    }
}

fn device_handle(track: &AudioTrack) -> Result<MemoryHandle, PipelineError> {
    track
        .device_handle()
        .ok_or_else(|| PipelineError::EmptyTrack(track.name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HostAccelerator;

    fn service() -> (tempfile::TempDir, StretchService<HostAccelerator>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("timestretch00.wgsl"),
            include_str!("../../kernels/timestretch00.wgsl"),
        )
        .unwrap();
        let config = PipelineConfig {
            frame_size: 256,
            kernel_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let service = StretchService::new(HostAccelerator::new(), config).unwrap();
        (dir, service)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            frame_size: 100,
            ..PipelineConfig::default()
        };
        let err = StretchService::new(HostAccelerator::new(), config).err().unwrap();
        assert_eq!(err.kind(), ErrorClass::InvalidInput);
    }

    #[test]
    fn test_move_audio_toggles() {
        let (_dir, service) = service();
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.02).sin()).collect();
        let mut track = AudioTrack::new("t", samples.clone(), 44_100, 1);
        let options = service.transform_options();

        service.move_audio(&mut track, &options).unwrap();
        assert!(track.is_on_device());
        assert!(track.metrics().get("chunk").is_some());
        assert!(track.metrics().get("push").is_some());

        service.move_audio(&mut track, &options).unwrap();
        assert!(track.is_on_host());
        assert_eq!(service.registry().live_groups(), 0);
        for (a, b) in track.samples().unwrap().iter().zip(&samples) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_empty_track_rejected() {
        let (_dir, service) = service();
        let mut track = AudioTrack::new("empty", Vec::new(), 44_100, 1);
        let err = service.move_to_device(&mut track, 256, 0.5).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyTrack(_)));
        assert!(track.is_on_host());
        assert!(!track.is_processing());
    }

    #[test]
    fn test_release() {
        let (_dir, service) = service();
        let mut track = AudioTrack::new("r", vec![0.1; 600], 44_100, 1);
        service.move_to_device(&mut track, 256, 0.5).unwrap();
        assert!(service.release(&mut track));
        assert!(!service.release(&mut track));
        assert_eq!(service.registry().live_groups(), 0);
        assert!(track.is_empty());
    }
}
