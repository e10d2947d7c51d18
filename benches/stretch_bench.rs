//! Benchmarks for framing, host transforms and full stretch runs.

use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use phobz_stretch::audio::synth::{generate_sine, generate_white_noise};
use phobz_stretch::audio::{reconstruct, segment, OverlapWindow};
use phobz_stretch::{AudioTrack, HostAccelerator, PipelineConfig, StreamPolicy, StretchService};

const SAMPLE_RATE: u32 = 44100;

fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Framing");
    let samples = generate_white_noise(SAMPLE_RATE, 5.0, 1.0, 42);
    group.throughput(Throughput::Elements(samples.len() as u64));

    for frame_size in [1024, 4096, 16384] {
        group.bench_with_input(
            BenchmarkId::new("segment", frame_size),
            &frame_size,
            |b, &size| {
                b.iter(|| black_box(segment(&samples, size, 0.5)));
            },
        );

        let set = segment(&samples, frame_size, 0.5).unwrap();
        group.bench_with_input(BenchmarkId::new("reconstruct", frame_size), &set, |b, set| {
            b.iter(|| black_box(reconstruct(set, OverlapWindow::Triangular)));
        });
    }

    group.finish();
}

fn bench_host_stretch(c: &mut Criterion) {
    let mut group = c.benchmark_group("Host Stretch");
    group.sample_size(10);

    let dir = tempfile::tempdir().unwrap();
    std::fs::copy(
        Path::new(env!("CARGO_MANIFEST_DIR")).join("kernels/timestretch00.wgsl"),
        dir.path().join("timestretch00.wgsl"),
    )
    .unwrap();

    let samples = generate_sine(440.0, SAMPLE_RATE, 2.0, 0.8);
    group.throughput(Throughput::Elements(samples.len() as u64));

    for (label, policy) in [
        ("single", StreamPolicy::Single),
        ("interleaved4", StreamPolicy::Interleaved { max_streams: 4 }),
    ] {
        let config = PipelineConfig {
            frame_size: 2048,
            kernel_dir: dir.path().to_path_buf(),
            stream_policy: policy,
            ..PipelineConfig::default()
        };
        let service = StretchService::new(HostAccelerator::new(), config).unwrap();
        let options = service.stretch_options(1.5);

        group.bench_function(BenchmarkId::new("stretch", label), |b| {
            b.iter(|| {
                let mut track = AudioTrack::new("bench", samples.clone(), SAMPLE_RATE, 1);
                service.stretch(&mut track, &options).unwrap();
                black_box(track.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_framing, bench_host_stretch);
criterion_main!(benches);
