//! Integration tests for the wgpu backend. Each test is skipped when no
//! adapter is available.

use std::path::Path;

use phobz_stretch::audio::{generate_chirp, generate_sine, FrameFft};
use phobz_stretch::gpu::{Accelerator, SpectralEngine};
use phobz_stretch::{
    AudioTrack, ComplexSample, DeviceRegistry, HostAccelerator, PipelineConfig, StretchService,
    WgpuAccelerator,
};
use std::sync::Arc;

const SAMPLE_RATE: u32 = 44100;

fn accelerator() -> Option<WgpuAccelerator> {
    match WgpuAccelerator::new() {
        Ok(accel) => Some(accel),
        Err(e) => {
            eprintln!("skipping: {}", e);
            None
        }
    }
}

#[test]
fn test_gpu_fft_matches_host() {
    let Some(accel) = accelerator() else {
        return;
    };
    let registry = Arc::new(DeviceRegistry::new(Arc::new(accel), 1));
    let engine = SpectralEngine::new(registry.clone());

    let frames: Vec<Vec<f32>> = [256usize, 1024, 4096]
        .iter()
        .map(|&n| generate_sine(1000.0, SAMPLE_RATE, 1.0, 1.0)[..n].to_vec())
        .collect();
    let handle = registry.push(&frames).unwrap();
    let spectrum = engine.forward_many(handle, true).unwrap();
    let gpu = registry.pull::<ComplexSample>(spectrum, false).unwrap();

    let fft = FrameFft::new();
    for (frame, gpu_bins) in frames.iter().zip(&gpu) {
        let host_bins = fft.forward(frame);
        assert_eq!(host_bins.len(), gpu_bins.len());
        let scale = frame.len() as f32;
        for (h, g) in host_bins.iter().zip(gpu_bins) {
            assert!((h.re - g.re).abs() / scale < 1e-4);
            assert!((h.im - g.im).abs() / scale < 1e-4);
        }
    }
    assert_eq!(registry.live_groups(), 1);
}

#[test]
fn test_gpu_fft_round_trip() {
    let Some(accel) = accelerator() else {
        return;
    };
    let registry = Arc::new(DeviceRegistry::new(Arc::new(accel), 1));
    let engine = SpectralEngine::new(registry.clone());

    let frames = vec![generate_chirp(100.0, 5000.0, SAMPLE_RATE, 0.1, 0.9)[..2048].to_vec(); 3];
    let handle = registry.push(&frames).unwrap();
    let spectrum = engine.forward_many(handle, false).unwrap();
    let restored = engine.inverse_many(spectrum, false).unwrap();
    let result = registry.pull::<f32>(restored, false).unwrap();

    for (a, b) in frames.iter().flatten().zip(result.iter().flatten()) {
        assert!((a - b).abs() < 1e-3);
    }
    assert_eq!(registry.live_groups(), 0);
}

#[test]
fn test_gpu_stretch_matches_host() {
    let Some(accel) = accelerator() else {
        return;
    };
    eprintln!("adapter: {}", accel.label());

    let dir = tempfile::tempdir().unwrap();
    std::fs::copy(
        Path::new(env!("CARGO_MANIFEST_DIR")).join("kernels/timestretch00.wgsl"),
        dir.path().join("timestretch00.wgsl"),
    )
    .unwrap();
    let config = PipelineConfig {
        frame_size: 2048,
        kernel_dir: dir.path().to_path_buf(),
        cache_dir: Some(dir.path().join("gpu-cache")),
        ..PipelineConfig::default()
    };
    let gpu = StretchService::new(accel, config.clone()).unwrap();
    let host = StretchService::new(
        HostAccelerator::new(),
        PipelineConfig {
            cache_dir: Some(dir.path().join("host-cache")),
            ..config
        },
    )
    .unwrap();

    let mut on_gpu = AudioTrack::new(
        "tone",
        generate_sine(440.0, SAMPLE_RATE, 0.5, 0.8),
        SAMPLE_RATE,
        1,
    );
    let mut on_host = on_gpu.clone();

    gpu.stretch(&mut on_gpu, &gpu.stretch_options(1.5)).unwrap();
    host.stretch(&mut on_host, &host.stretch_options(1.5)).unwrap();

    let (a, b) = (on_gpu.samples().unwrap(), on_host.samples().unwrap());
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < 1e-2);
    }
    assert_eq!(gpu.registry().live_groups(), 0);
}
