//! Compute pipeline creation for FFT passes and stretch kernels.

use wgpu::{BindGroupLayout, ComputePipeline, Device, ShaderModule};

/// All compute pipelines needed for frame transforms.
pub struct FftPipelines {
    pub load_real: ComputePipeline,
    pub load_complex: ComputePipeline,
    pub butterfly: ComputePipeline,
    pub store_real: ComputePipeline,
}

impl FftPipelines {
    /// Create all FFT pipelines from the shader module.
    pub fn new(device: &Device, shader: &ShaderModule, layout: &BindGroupLayout) -> Self {
        Self {
            load_real: create_pipeline(device, shader, layout, "load_real"),
            load_complex: create_pipeline(device, shader, layout, "load_complex"),
            butterfly: create_pipeline(device, shader, layout, "butterfly"),
            store_real: create_pipeline(device, shader, layout, "store_real"),
        }
    }
}

/// The layout shared by every compute pass: input storage, output storage,
/// uniform params. Stretch kernels are built against it as well.
pub fn create_compute_layout(device: &Device, name: &str) -> BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{}_layout", name)),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}

pub fn create_pipeline(
    device: &Device,
    shader: &ShaderModule,
    layout: &BindGroupLayout,
    entry_point: &str,
) -> ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{}_pipeline_layout", entry_point)),
        bind_group_layouts: &[layout],
        immediate_size: 0,
    });

    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&format!("{}_pipeline", entry_point)),
        layout: Some(&pipeline_layout),
        module: shader,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

/// Bind input, output and params to the shared compute layout.
pub fn create_bind_group(
    device: &Device,
    label: &str,
    layout: &BindGroupLayout,
    input: &wgpu::Buffer,
    output: &wgpu::Buffer,
    params: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: input.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: output.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: params.as_entire_binding(),
            },
        ],
    })
}
