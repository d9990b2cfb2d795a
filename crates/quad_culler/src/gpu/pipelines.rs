use super::shaders::cull_shader_source;
use crate::error::{CullError, CullResult};

pub const BINDING_IN_INDICES: u32 = 0;
pub const BINDING_OUT_INDICES: u32 = 1;
pub const BINDING_POSITIONS: u32 = 2;
pub const BINDING_DRAW_ARGS: u32 = 3;
pub const BINDING_PARAMS: u32 = 4;

pub struct GpuPipelines {
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub reset_pipeline: wgpu::ComputePipeline,
    pub cull_pipeline: wgpu::ComputePipeline,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub async fn create_pipelines(
    device: &wgpu::Device,
    workgroup_size: u32,
) -> CullResult<GpuPipelines> {
    create_pipelines_from_source(device, &cull_shader_source(workgroup_size)).await
}

/// Builds both pipelines from WGSL source exposing `reset_args` and `main`.
///
/// Shader compilation and pipeline creation run inside one validation scope,
/// so a bad shader comes back as [`CullError::Validation`].
pub(crate) async fn create_pipelines_from_source(
    device: &wgpu::Device,
    source: &str,
) -> CullResult<GpuPipelines> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("quad_culler.cull.wgsl"),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("quad_culler.bind_group_layout"),
        entries: &[
            storage_entry(BINDING_IN_INDICES, true),
            storage_entry(BINDING_OUT_INDICES, false),
            storage_entry(BINDING_POSITIONS, true),
            storage_entry(BINDING_DRAW_ARGS, false),
            wgpu::BindGroupLayoutEntry {
                binding: BINDING_PARAMS,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("quad_culler.pipeline_layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let reset_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("quad_culler.reset_pipeline"),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: "reset_args",
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });
    let cull_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("quad_culler.cull_pipeline"),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: "main",
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });
    if let Some(err) = device.pop_error_scope().await {
        return Err(CullError::Validation {
            label: "cull pipeline",
            message: err.to_string(),
        });
    }

    Ok(GpuPipelines {
        bind_group_layout,
        reset_pipeline,
        cull_pipeline,
    })
}
