//! Uniform parameter structs for the compute shaders.
//!
//! These structs must match the WGSL shader definitions exactly,
//! including alignment requirements.

/// FFT pass parameters (`fft.wgsl`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FftParams {
    pub n: u32,
    pub stage: u32,
    /// 0 = forward, 1 = inverse.
    pub inverse: u32,
    pub log2_n: u32,
}

impl FftParams {
    pub fn new(fft_size: usize, stage: u32, inverse: bool) -> Self {
        Self {
            n: fft_size as u32,
            stage,
            inverse: u32::from(inverse),
            log2_n: fft_size.trailing_zeros(),
        }
    }
}

/// Arguments handed to a stretch kernel for one frame.
///
/// WGSL: `struct StretchParams { length: u32, overlap: u32, sample_rate: u32, factor: f32 }`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StretchParams {
    /// Complex bins in the frame.
    pub length: u32,
    /// Overlap between consecutive frames, in samples.
    pub overlap: u32,
    pub sample_rate: u32,
    pub factor: f32,
}

impl StretchParams {
    pub fn new(length: usize, overlap: usize, sample_rate: u32, factor: f64) -> Self {
        Self {
            length: length as u32,
            overlap: overlap as u32,
            sample_rate,
            factor: factor as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<FftParams>(), 16);
        assert_eq!(std::mem::size_of::<StretchParams>(), 16);
    }

    #[test]
    fn test_fft_params_log2() {
        let params = FftParams::new(2048, 3, true);
        assert_eq!(params.log2_n, 11);
        assert_eq!(params.inverse, 1);
        assert_eq!(params.stage, 3);
    }
}
