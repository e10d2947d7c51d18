//! Failures surface through the installed `log` backend.
//!
//! Kept in its own test binary since the process-wide logger can only be
//! installed once.

use std::path::Path;

use phobz_stretch::audio::generate_sine;
use phobz_stretch::{
    AudioTrack, ErrorClass, HostAccelerator, LogConfig, LogRing, PipelineConfig, StretchService,
};

#[test]
fn test_rejected_factor_is_logged() {
    let ring = LogRing::new(&LogConfig::default()).unwrap();
    ring.install().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let bundled = Path::new(env!("CARGO_MANIFEST_DIR")).join("kernels");
    for entry in std::fs::read_dir(bundled).unwrap() {
        let path = entry.unwrap().path();
        std::fs::copy(&path, dir.path().join(path.file_name().unwrap())).unwrap();
    }
    let config = PipelineConfig {
        kernel_dir: dir.path().to_path_buf(),
        ..PipelineConfig::default()
    };
    let service = StretchService::new(HostAccelerator::new(), config).unwrap();
    let mut track = AudioTrack::new("t", generate_sine(440.0, 44100, 0.1, 0.5), 44100, 1);

    for factor in [0.0, f64::NAN, 1e-50] {
        let err = service
            .stretch(&mut track, &service.stretch_options(factor))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorClass::InvalidInput);
    }

    let failures: Vec<String> = ring
        .entries()
        .into_iter()
        .filter(|line| line.contains("stretch of 't' failed"))
        .collect();
    assert_eq!(failures.len(), 3, "{:?}", ring.entries());
    assert!(track.is_on_host());
    assert_eq!(service.registry().live_groups(), 0);
}
