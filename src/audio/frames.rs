//! Frame segmentation and overlap-add reconstruction.
//!
//! A host sample buffer is split into fixed-size, overlapping frames for
//! per-frame GPU dispatch. Reconstruction sums the overlapping frame
//! contributions back into a continuous buffer.
//!
//! # Normalization
//!
//! Reconstruction is a weighted overlap-add: every output sample is
//! `Σ wᵢ·xᵢ / Σ wᵢ` over the frames covering it, with `w` taken from the
//! selected [`OverlapWindow`]. Dividing by the weight sum keeps the overlap
//! region at unit gain, so a constant input reconstructs to the same constant
//! and an unmodified frame set reproduces its source exactly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest frame size accepted by the segmenter.
pub const MIN_FRAME_SIZE: usize = 128;

/// Longest buffer a stretched layout may reconstruct into, in samples.
pub const MAX_TARGET_LEN: usize = isize::MAX as usize / std::mem::size_of::<f32>();

/// Errors that can occur while segmenting or reconstructing frames.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("Frame size must be at least {min}, got {got}")]
    FrameTooSmall { min: usize, got: usize },

    #[error("Overlap must be within [0, 1), got {0}")]
    InvalidOverlap(f32),

    #[error("Cannot segment an empty sample buffer")]
    EmptyInput,

    #[error("Frame {index} has length {got}, expected {expected}")]
    FrameLength {
        index: usize,
        expected: usize,
        got: usize,
    },

    #[error("Stretch factor must be finite and positive, got {0}")]
    InvalidFactor(f64),

    #[error("Stretch factor {factor} leaves gaps between frames; minimum is {min:.4}")]
    FactorTooSmall { factor: f64, min: f64 },
}

/// Synthesis weighting used during overlap-add.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapWindow {
    /// Every sample of every frame weighs the same.
    Rectangular,
    /// Bartlett weights peaking at the frame centre. Sampled at half-sample
    /// offsets so edge weights stay above zero.
    #[default]
    Triangular,
}

impl OverlapWindow {
    /// Weight of sample `index` inside a frame of `len` samples.
    pub fn weight(self, index: usize, len: usize) -> f32 {
        match self {
            OverlapWindow::Rectangular => 1.0,
            OverlapWindow::Triangular => {
                let x = (2 * index + 1) as f32 / len as f32;
                1.0 - (x - 1.0).abs()
            }
        }
    }
}

/// Geometry shared by every frame of a [`FrameSet`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameLayout {
    /// Samples per frame.
    pub frame_size: usize,
    /// Distance between frame starts in the source buffer.
    pub hop: usize,
    /// Distance between frame starts when reconstructing.
    pub synthesis_hop: usize,
    /// Length of the buffer the frames were cut from.
    pub source_len: usize,
    /// Length of the reconstructed buffer.
    pub target_len: usize,
}

impl FrameLayout {
    /// Build and validate the layout for segmenting `source_len` samples.
    pub fn new(source_len: usize, frame_size: usize, overlap: f32) -> Result<Self, FrameError> {
        if frame_size < MIN_FRAME_SIZE {
            return Err(FrameError::FrameTooSmall {
                min: MIN_FRAME_SIZE,
                got: frame_size,
            });
        }
        if !overlap.is_finite() || !(0.0..1.0).contains(&overlap) {
            return Err(FrameError::InvalidOverlap(overlap));
        }
        if source_len == 0 {
            return Err(FrameError::EmptyInput);
        }

        let hop = frame_size - overlap_size(frame_size, overlap);
        Ok(Self {
            frame_size,
            hop,
            synthesis_hop: hop,
            source_len,
            target_len: source_len,
        })
    }

    /// Samples shared by two consecutive frames.
    pub fn overlap_size(&self) -> usize {
        self.frame_size - self.hop
    }

    /// Smallest factor [`Self::stretched`] accepts.
    pub fn min_factor(&self) -> f64 {
        self.synthesis_hop as f64 / self.frame_size as f64
    }

    /// Number of frames needed to cover the source buffer.
    pub fn frame_count(&self) -> usize {
        if self.source_len <= self.frame_size {
            1
        } else {
            1 + (self.source_len - self.frame_size).div_ceil(self.hop)
        }
    }

    /// Layout for reconstructing frames that were stretched by `factor`.
    ///
    /// The synthesis hop shrinks (factor > 1) or grows (factor < 1), and the
    /// target length follows `target_len / factor`. Stretching an already
    /// stretched layout compounds the factors.
    ///
    /// The synthesis hop may not exceed the frame size, so every output
    /// position stays covered by at least one frame. That bounds the factor
    /// from below by [`Self::min_factor`].
    pub fn stretched(&self, factor: f64) -> Result<Self, FrameError> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(FrameError::InvalidFactor(factor));
        }

        let synthesis_hop = (self.synthesis_hop as f64 / factor).round().max(1.0);
        if synthesis_hop > self.frame_size as f64 {
            return Err(FrameError::FactorTooSmall {
                factor,
                min: self.min_factor(),
            });
        }
        let target_len = (self.target_len as f64 / factor).round().max(1.0);
        if target_len > MAX_TARGET_LEN as f64 {
            return Err(FrameError::InvalidFactor(factor));
        }

        let synthesis_hop = synthesis_hop as usize;
        let target_len = target_len as usize;
        Ok(Self {
            synthesis_hop,
            target_len,
            ..*self
        })
    }
}

/// Overlap in samples for a frame size and overlap fraction.
pub fn overlap_size(frame_size: usize, overlap: f32) -> usize {
    (frame_size as f64 * overlap as f64).floor() as usize
}

/// Ordered frames with their shared layout.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSet<T = f32> {
    pub frames: Vec<Vec<T>>,
    pub layout: FrameLayout,
}

impl<T> FrameSet<T> {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame lengths, in order.
    pub fn lengths(&self) -> Vec<usize> {
        self.frames.iter().map(Vec::len).collect()
    }
}

/// Split `samples` into overlapping frames of `frame_size` samples.
///
/// The final frame is zero-padded when the buffer does not end on a frame
/// boundary. Same input always yields the same frames.
pub fn segment(samples: &[f32], frame_size: usize, overlap: f32) -> Result<FrameSet, FrameError> {
    let layout = FrameLayout::new(samples.len(), frame_size, overlap)?;

    let frames = (0..layout.frame_count())
        .map(|index| {
            let start = index * layout.hop;
            let end = (start + frame_size).min(samples.len());
            let mut frame = vec![0.0f32; frame_size];
            frame[..end - start].copy_from_slice(&samples[start..end]);
            frame
        })
        .collect();

    Ok(FrameSet { frames, layout })
}

/// Reassemble a buffer from overlapping frames using weighted overlap-add.
///
/// Frames are placed `layout.synthesis_hop` apart. Positions covered by no
/// frame (possible when the synthesis hop exceeds the frame size) stay silent.
/// The result is trimmed or zero-extended to `layout.target_len`.
pub fn reconstruct(set: &FrameSet<f32>, window: OverlapWindow) -> Result<Vec<f32>, FrameError> {
    let layout = &set.layout;
    if set.frames.is_empty() {
        return Err(FrameError::EmptyInput);
    }
    for (index, frame) in set.frames.iter().enumerate() {
        if frame.len() != layout.frame_size {
            return Err(FrameError::FrameLength {
                index,
                expected: layout.frame_size,
                got: frame.len(),
            });
        }
    }

    let weights: Vec<f32> = (0..layout.frame_size)
        .map(|i| window.weight(i, layout.frame_size))
        .collect();

    let span = (set.frames.len() - 1) * layout.synthesis_hop + layout.frame_size;
    let mut acc = vec![0.0f32; span];
    let mut norm = vec![0.0f32; span];

    for (index, frame) in set.frames.iter().enumerate() {
        let start = index * layout.synthesis_hop;
        let acc = &mut acc[start..start + layout.frame_size];
        let norm = &mut norm[start..start + layout.frame_size];
        for (((out, weight_sum), &sample), &w) in
            acc.iter_mut().zip(norm.iter_mut()).zip(frame).zip(&weights)
        {
            *out += sample * w;
            *weight_sum += w;
        }
    }

    let mut output: Vec<f32> = acc
        .iter()
        .zip(&norm)
        .map(|(&sum, &w)| if w > f32::EPSILON { sum / w } else { 0.0 })
        .collect();
    output.resize(layout.target_len, 0.0);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * 0.01).sin()).collect()
    }

    #[test]
    fn test_frame_count_covers_buffer() {
        let layout = FrameLayout::new(10_000, 1024, 0.5).unwrap();
        assert_eq!(layout.hop, 512);
        assert_eq!(layout.overlap_size(), 512);
        let count = layout.frame_count();
        assert!(count * layout.hop + layout.frame_size >= 10_000);
        assert!((count - 1) * layout.hop < 10_000);
    }

    #[test]
    fn test_short_buffer_single_padded_frame() {
        let set = segment(&[1.0; 100], 256, 0.25).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.frames[0].len(), 256);
        assert!(set.frames[0][100..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        assert_eq!(
            segment(&[0.0; 512], 64, 0.5),
            Err(FrameError::FrameTooSmall { min: 128, got: 64 })
        );
        assert_eq!(
            segment(&[0.0; 512], 256, 1.0),
            Err(FrameError::InvalidOverlap(1.0))
        );
        assert!(matches!(
            segment(&[0.0; 512], 256, f32::NAN),
            Err(FrameError::InvalidOverlap(_))
        ));
        assert_eq!(segment(&[], 256, 0.5), Err(FrameError::EmptyInput));
    }

    #[test]
    fn test_segment_is_deterministic() {
        let samples = ramp(5000);
        assert_eq!(segment(&samples, 512, 0.5), segment(&samples, 512, 0.5));
    }

    #[test]
    fn test_round_trip_both_windows() {
        let samples = ramp(7777);
        for window in [OverlapWindow::Rectangular, OverlapWindow::Triangular] {
            let set = segment(&samples, 256, 0.5).unwrap();
            let rebuilt = reconstruct(&set, window).unwrap();
            assert_eq!(rebuilt.len(), samples.len());
            for (a, b) in rebuilt.iter().zip(&samples) {
                assert!((a - b).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_constant_signal_has_no_boundary_doubling() {
        let samples = vec![0.5f32; 4096];
        let set = segment(&samples, 512, 0.5).unwrap();
        let stretched = FrameSet {
            layout: set.layout.stretched(1.5).unwrap(),
            frames: set.frames.clone(),
        };
        let rebuilt = reconstruct(&stretched, OverlapWindow::Triangular).unwrap();
        assert_eq!(rebuilt.len(), 2731);
        for &s in &rebuilt {
            assert!((s - 0.5).abs() < 1e-5, "amplitude jumped to {}", s);
        }
    }

    #[test]
    fn test_stretched_layout_lengths() {
        let layout = FrameLayout::new(88_200, 2048, 0.5).unwrap();
        let stretched = layout.stretched(1.5).unwrap();
        assert_eq!(stretched.synthesis_hop, 683);
        assert_eq!(stretched.target_len, 58_800);
        assert_eq!(stretched.stretched(2.0).unwrap().target_len, 29_400);
        assert!(layout.stretched(0.0).is_err());
        assert!(layout.stretched(f64::INFINITY).is_err());
    }

    #[test]
    fn test_slow_down_limited_by_overlap() {
        let layout = FrameLayout::new(44_100, 2048, 0.0).unwrap();
        assert_eq!(layout.min_factor(), 1.0);
        assert_eq!(
            layout.stretched(0.8),
            Err(FrameError::FactorTooSmall {
                factor: 0.8,
                min: 1.0
            })
        );

        let half = FrameLayout::new(44_100, 2048, 0.5).unwrap();
        assert_eq!(half.min_factor(), 0.5);
        assert_eq!(half.stretched(0.5).unwrap().synthesis_hop, 2048);
        assert!(matches!(
            half.stretched(0.4),
            Err(FrameError::FactorTooSmall { .. })
        ));
        // Compounding counts against the same bound.
        let slowed = half.stretched(0.8).unwrap();
        assert!(slowed.stretched(0.5).is_err());
    }

    #[test]
    fn test_tiny_factor_rejected_without_overflow() {
        let layout = FrameLayout::new(882, 256, 0.5).unwrap();
        for factor in [1e-30, 1e-300, f64::MIN_POSITIVE] {
            assert!(layout.stretched(factor).is_err(), "factor {} accepted", factor);
        }
    }

    #[test]
    fn test_slow_down_is_continuous() {
        let samples = vec![0.5f32; 44_100];
        let set = segment(&samples, 2048, 0.5).unwrap();
        let stretched = FrameSet {
            layout: set.layout.stretched(0.8).unwrap(),
            frames: set.frames.clone(),
        };
        let rebuilt = reconstruct(&stretched, OverlapWindow::Triangular).unwrap();
        assert_eq!(rebuilt.len(), 55_125);
        // The zero-padded tail of the last frame lands past the source end.
        let covered = (stretched.layout.source_len as f64 / 0.8) as usize - 2048;
        for (i, &s) in rebuilt[..covered].iter().enumerate() {
            assert!((s - 0.5).abs() < 1e-5, "sample {} is {}", i, s);
        }
    }

    #[test]
    fn test_reconstruct_rejects_ragged_frames() {
        let mut set = segment(&ramp(1000), 256, 0.0).unwrap();
        set.frames[1].pop();
        assert_eq!(
            reconstruct(&set, OverlapWindow::Rectangular),
            Err(FrameError::FrameLength {
                index: 1,
                expected: 256,
                got: 255
            })
        );
    }

    #[test]
    fn test_triangular_weights_positive() {
        for i in 0..128 {
            assert!(OverlapWindow::Triangular.weight(i, 128) > 0.0);
        }
    }
}
