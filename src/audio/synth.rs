//! Synthetic test signals.
//!
//! Deterministic tones and noise for tests and benchmarks, so no audio file
//! is ever needed to exercise the pipeline.

use std::f32::consts::PI;

/// Generate a sine wave.
///
/// # Arguments
/// * `frequency` - Frequency in Hz
/// * `sample_rate` - Sample rate in Hz
/// * `duration` - Duration in seconds
/// * `amplitude` - Peak amplitude
pub fn generate_sine(frequency: f32, sample_rate: u32, duration: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (duration * sample_rate as f32) as usize;
    let step = 2.0 * PI * frequency / sample_rate as f32;
    (0..num_samples)
        .map(|i| amplitude * (step * i as f32).sin())
        .collect()
}

/// Linear sweep from `start_hz` to `end_hz` over `duration` seconds.
pub fn generate_chirp(
    start_hz: f32,
    end_hz: f32,
    sample_rate: u32,
    duration: f32,
    amplitude: f32,
) -> Vec<f32> {
    let num_samples = (duration * sample_rate as f32) as usize;
    let rate = (end_hz - start_hz) / duration.max(f32::EPSILON);
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * PI * (start_hz * t + 0.5 * rate * t * t)).sin()
        })
        .collect()
}

/// Uniform white noise in `[-amplitude, amplitude]`.
///
/// Seeded LCG, so the same seed always yields the same buffer.
pub fn generate_white_noise(sample_rate: u32, duration: f32, amplitude: f32, seed: u64) -> Vec<f32> {
    let num_samples = (duration * sample_rate as f32) as usize;
    let mut state = seed;
    (0..num_samples)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            // Top 24 bits give an exact f32 in [0, 1).
            let unit = (state >> 40) as f32 / (1u64 << 24) as f32;
            amplitude * (unit * 2.0 - 1.0)
        })
        .collect()
}
