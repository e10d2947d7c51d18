//! GPU buffer helpers for frame storage and FFT parameters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use wgpu::util::DeviceExt;
use wgpu::{Buffer, BufferUsages, Device};

use super::params::FftParams;

/// Storage buffer for one frame (or FFT scratch), `words` f32s long.
pub fn create_storage_buffer(device: &Device, label: &str, words: usize) -> Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: (words * std::mem::size_of::<f32>()) as u64,
        usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Mappable readback buffer.
pub fn create_staging_buffer(device: &Device, size: u64) -> Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("frame_staging"),
        size,
        usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Uniform buffer initialized with `contents`.
pub fn create_uniform_buffer<T: bytemuck::Pod>(device: &Device, label: &str, contents: &T) -> Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(contents),
        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
    })
}

/// Per-stage uniform buffers, cached by frame length and direction.
///
/// Each butterfly stage gets its own buffer so a whole transform can be
/// recorded into one submission. Index 0 doubles as the load/store params.
#[derive(Default)]
pub struct FftParamBuffers {
    cache: Mutex<HashMap<(usize, bool), Arc<Vec<Buffer>>>>,
}

impl FftParamBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stages(&self, device: &Device, fft_size: usize, inverse: bool) -> Arc<Vec<Buffer>> {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache
            .entry((fft_size, inverse))
            .or_insert_with(|| {
                let num_stages = fft_size.trailing_zeros();
                Arc::new(
                    (0..num_stages.max(1))
                        .map(|stage| {
                            let params = FftParams::new(fft_size, stage, inverse);
                            create_uniform_buffer(device, "fft_params", &params)
                        })
                        .collect(),
                )
            })
            .clone()
    }
}
