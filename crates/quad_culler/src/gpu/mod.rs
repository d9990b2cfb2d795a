//! GPU quad culling using wgpu compute shaders.
//!
//! `GpuQuadCuller` owns the pipelines; `QuadCullBuffers` owns the per-batch
//! device buffers. A frame records the reset pass and the culling pass with
//! [`GpuQuadCuller::encode_cull`] and then draws straight from the output
//! buffers with `draw_indexed_indirect`.

use bytemuck::{Pod, Zeroable};

use crate::core::{CullMode, CullParams, WORKGROUP_SIZE};
use crate::error::{CullError, CullResult};

mod buffers;
mod cull;
mod pipelines;
mod shaders;

pub(crate) use buffers::map_buffer;
pub use cull::QuadCullBuffers;
use pipelines::create_pipelines;

/// Configuration for the GPU culler.
#[derive(Debug, Clone)]
pub struct GpuQuadCullerConfig {
    /// Invocations per workgroup (0 = reference sizing of 64).
    pub workgroup_size: u32,
}

impl Default for GpuQuadCullerConfig {
    fn default() -> Self {
        Self {
            workgroup_size: WORKGROUP_SIZE,
        }
    }
}

/// Uniform block read by both passes.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct CullUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub quad_count: u32,
    pub cull_mode: u32,
    pub _pad0: [u32; 2],
}

impl CullUniforms {
    pub fn new(params: &CullParams, mode: CullMode) -> Self {
        Self {
            view_proj: params.view_proj.to_cols_array_2d(),
            quad_count: params.quad_count,
            cull_mode: mode.gpu_flag(),
            _pad0: [0; 2],
        }
    }
}

/// GPU quad culler.
pub struct GpuQuadCuller {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) adapter_info: Option<wgpu::AdapterInfo>,
    pub(crate) bind_group_layout: wgpu::BindGroupLayout,
    pub(crate) reset_pipeline: wgpu::ComputePipeline,
    pub(crate) cull_pipeline: wgpu::ComputePipeline,
    pub(crate) workgroup_size: u32,
    pub(crate) max_storage_buffer_binding_size: u64,
    pub(crate) max_compute_workgroups_per_dimension: u32,
}

/// Summary of GPU device limits relevant to culling.
#[derive(Debug, Clone, Copy)]
pub struct GpuLimitsSummary {
    pub max_invocations_per_workgroup: u32,
    pub max_storage_buffer_binding_size: u64,
    pub max_compute_workgroups_per_dimension: u32,
}

impl GpuQuadCuller {
    /// Creates a culler on the default adapter.
    pub async fn new(config: GpuQuadCullerConfig) -> CullResult<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .ok_or(CullError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .map_err(|e| CullError::RequestDevice(e.to_string()))?;

        let info = adapter.get_info();
        log::info!("quad culler adapter: {} ({:?})", info.name, info.backend);

        let mut culler = Self::with_device(device, queue, config).await?;
        culler.adapter_info = Some(info);
        Ok(culler)
    }

    /// Creates a culler on a device owned by the caller's renderer.
    pub async fn with_device(
        device: wgpu::Device,
        queue: wgpu::Queue,
        config: GpuQuadCullerConfig,
    ) -> CullResult<Self> {
        let limits = device.limits();
        let workgroup_size = compute_workgroup_size(
            &config,
            limits
                .max_compute_invocations_per_workgroup
                .min(limits.max_compute_workgroup_size_x),
        );
        if workgroup_size != config.workgroup_size {
            log::warn!(
                "quad culler workgroup size {} adjusted to {}",
                config.workgroup_size,
                workgroup_size
            );
        }

        let pipelines = create_pipelines(&device, workgroup_size).await?;

        Ok(Self {
            device,
            queue,
            adapter_info: None,
            bind_group_layout: pipelines.bind_group_layout,
            reset_pipeline: pipelines.reset_pipeline,
            cull_pipeline: pipelines.cull_pipeline,
            workgroup_size,
            max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size as u64,
            max_compute_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
        })
    }

    /// Returns the wgpu device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Returns the wgpu queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> Option<&wgpu::AdapterInfo> {
        self.adapter_info.as_ref()
    }

    /// Returns the workgroup size the culling pipeline was built with.
    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    pub fn limits_summary(&self) -> GpuLimitsSummary {
        GpuLimitsSummary {
            max_invocations_per_workgroup: self.device.limits().max_compute_invocations_per_workgroup,
            max_storage_buffer_binding_size: self.max_storage_buffer_binding_size,
            max_compute_workgroups_per_dimension: self.max_compute_workgroups_per_dimension,
        }
    }

    pub(crate) fn ensure_workgroups_fit(&self, workgroups: u32, label: &'static str) -> CullResult<()> {
        if workgroups > self.max_compute_workgroups_per_dimension {
            return Err(CullError::Limits {
                label,
                value: workgroups as u64,
                limit: self.max_compute_workgroups_per_dimension as u64,
            });
        }
        Ok(())
    }

    pub(crate) fn ensure_storage_fits(&self, bytes: u64, label: &'static str) -> CullResult<()> {
        if bytes > self.max_storage_buffer_binding_size {
            return Err(CullError::Limits {
                label,
                value: bytes,
                limit: self.max_storage_buffer_binding_size,
            });
        }
        Ok(())
    }
}

fn compute_workgroup_size(config: &GpuQuadCullerConfig, max_invocations: u32) -> u32 {
    let requested = if config.workgroup_size == 0 {
        WORKGROUP_SIZE
    } else {
        config.workgroup_size
    };
    requested.clamp(1, max_invocations.max(1))
}
