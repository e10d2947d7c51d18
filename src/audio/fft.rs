//! Frame transforms using RustFFT.
//!
//! CPU counterpart of the GPU FFT passes: full complex spectrum forward,
//! real part scaled by `1/n` on the way back.

use std::sync::Mutex;

use rustfft::{num_complex::Complex, FftPlanner};

use crate::gpu::ComplexSample;

/// Plans and runs forward / inverse FFTs on single frames.
///
/// Plans are cached by the underlying planner, so repeated frames of the same
/// length only pay for planning once.
pub struct FrameFft {
    planner: Mutex<FftPlanner<f32>>,
}

impl Default for FrameFft {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameFft {
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    /// Complex spectrum of a real frame. Output has one bin per input sample.
    pub fn forward(&self, samples: &[f32]) -> Vec<ComplexSample> {
        let mut buffer: Vec<Complex<f32>> =
            samples.iter().map(|&s| Complex::new(s, 0.0)).collect();

        let fft = self.lock().plan_fft_forward(buffer.len());
        fft.process(&mut buffer);

        buffer.into_iter().map(ComplexSample::from).collect()
    }

    /// Real part of the inverse transform, normalized by the frame length.
    pub fn inverse(&self, spectrum: &[ComplexSample]) -> Vec<f32> {
        let mut buffer: Vec<Complex<f32>> = spectrum.iter().map(|&c| c.into()).collect();
        let n = buffer.len();

        let fft = self.lock().plan_fft_inverse(n);
        fft.process(&mut buffer);

        let scale = 1.0 / n as f32;
        buffer.iter().map(|c| c.re * scale).collect()
    }

    /// Get the frequency in Hz for a given bin index.
    pub fn bin_to_freq(bin: usize, frame_size: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / frame_size as f32
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FftPlanner<f32>> {
        // A poisoned planner only means another frame panicked mid-plan.
        self.planner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
