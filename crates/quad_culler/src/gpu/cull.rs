//! Culling dispatch: buffer setup, pass recording and readback.

use wgpu::util::DeviceExt;

use super::pipelines::{
    BINDING_DRAW_ARGS, BINDING_IN_INDICES, BINDING_OUT_INDICES, BINDING_PARAMS, BINDING_POSITIONS,
};
use super::{map_buffer, CullUniforms, GpuQuadCuller};
use crate::core::{
    dispatch_workgroups, CullMode, CullOutput, CullParams, DispatchStats, DrawIndexedIndirectArgs,
    QuadBatch,
};
use crate::error::{CullError, CullResult};
use crate::packing::PACKED_ENTRIES_PER_QUAD;

/// Device buffers for one quad batch.
///
/// `out_indices` and `draw_args` are the draw inputs: bind `out_indices` as
/// a `Uint16` index buffer and pass `draw_args` to `draw_indexed_indirect`
/// once the culling passes have been submitted. The same buffers can be
/// re-encoded every frame; the reset pass restores `draw_args` first.
pub struct QuadCullBuffers {
    pub in_indices: wgpu::Buffer,
    pub out_indices: wgpu::Buffer,
    pub positions: wgpu::Buffer,
    pub draw_args: wgpu::Buffer,
    pub params: wgpu::Buffer,
    pub(crate) bind_group: wgpu::BindGroup,
    quad_capacity: u32,
}

impl QuadCullBuffers {
    /// Uploads the batch and allocates outputs sized for every quad surviving.
    pub fn new(culler: &GpuQuadCuller, batch: &QuadBatch) -> CullResult<Self> {
        batch.validate()?;
        let quad_capacity = batch.quad_count();
        let index_bytes = (batch.packed_indices.len() as u64).saturating_mul(4);
        let position_bytes = (batch.positions.len() as u64).saturating_mul(4);
        culler.ensure_storage_fits(index_bytes, "input indices")?;
        culler.ensure_storage_fits(index_bytes, "output indices")?;
        culler.ensure_storage_fits(position_bytes, "positions")?;

        let device = &culler.device;

        // Zero-sized bindings are invalid; keep a minimum of 16 bytes.
        let in_indices = if batch.packed_indices.is_empty() {
            empty_buffer(device, "quad_culler.in_indices", wgpu::BufferUsages::STORAGE)
        } else {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("quad_culler.in_indices"),
                contents: bytemuck::cast_slice(&batch.packed_indices),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            })
        };

        let positions = if batch.positions.is_empty() {
            empty_buffer(device, "quad_culler.positions", wgpu::BufferUsages::STORAGE)
        } else {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("quad_culler.positions"),
                contents: bytemuck::cast_slice(&batch.positions),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::COPY_DST,
            })
        };

        let out_indices = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("quad_culler.out_indices"),
            size: index_bytes.max(16),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::INDEX
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let draw_args = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad_culler.draw_args"),
            contents: DrawIndexedIndirectArgs::RESET.as_bytes(),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        });

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("quad_culler.params"),
            size: std::mem::size_of::<CullUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("quad_culler.bind_group"),
            layout: &culler.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: BINDING_IN_INDICES,
                    resource: in_indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: BINDING_OUT_INDICES,
                    resource: out_indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: BINDING_POSITIONS,
                    resource: positions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: BINDING_DRAW_ARGS,
                    resource: draw_args.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: BINDING_PARAMS,
                    resource: params.as_entire_binding(),
                },
            ],
        });

        Ok(Self {
            in_indices,
            out_indices,
            positions,
            draw_args,
            params,
            bind_group,
            quad_capacity,
        })
    }

    /// Number of quads the output stream can hold.
    pub fn quad_capacity(&self) -> u32 {
        self.quad_capacity
    }
}

fn empty_buffer(device: &wgpu::Device, label: &'static str, usage: wgpu::BufferUsages) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: 16,
        usage,
        mapped_at_creation: false,
    })
}

// === Recording ===

impl GpuQuadCuller {
    /// Records the reset pass followed by the culling pass.
    ///
    /// The reset runs as its own dispatch so it is complete and visible
    /// before any culling invocation touches the counter. The parameter block
    /// is written through the queue and lands at the next submit.
    pub fn encode_cull(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        buffers: &QuadCullBuffers,
        params: &CullParams,
        mode: CullMode,
    ) -> CullResult<u32> {
        if params.quad_count > buffers.quad_capacity {
            return Err(CullError::InvalidInput(format!(
                "quad_count {} exceeds buffer capacity {}",
                params.quad_count, buffers.quad_capacity
            )));
        }
        let workgroups = dispatch_workgroups(params.quad_count, self.workgroup_size);
        self.ensure_workgroups_fit(workgroups, "cull workgroups")?;

        let uniforms = CullUniforms::new(params, mode);
        self.queue
            .write_buffer(&buffers.params, 0, bytemuck::bytes_of(&uniforms));

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("quad_culler.reset_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.reset_pipeline);
            pass.set_bind_group(0, &buffers.bind_group, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }

        if workgroups > 0 {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("quad_culler.cull_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.cull_pipeline);
            pass.set_bind_group(0, &buffers.bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }

        log::trace!(
            "encoded quad cull: quads={} workgroups={} mode={:?}",
            params.quad_count,
            workgroups,
            mode
        );
        Ok(workgroups)
    }
}

// === Dispatch ===

impl GpuQuadCuller {
    /// Uploads, culls and reads back a batch.
    pub async fn cull(
        &self,
        batch: &QuadBatch,
        params: &CullParams,
        mode: CullMode,
    ) -> CullResult<CullOutput> {
        params.validate(batch)?;
        batch.validate_indices(params.quad_count)?;

        let buffers = QuadCullBuffers::new(self, batch)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("quad_culler.encoder"),
            });
        let workgroups = match self.encode_cull(&mut encoder, &buffers, params, mode) {
            Ok(workgroups) => workgroups,
            Err(err) => {
                let _ = self.device.pop_error_scope().await;
                return Err(err);
            }
        };

        self.queue.submit([encoder.finish()]);
        self.device.poll(wgpu::Maintain::Wait);

        if let Some(err) = self.device.pop_error_scope().await {
            return Err(CullError::Validation {
                label: "cull pass",
                message: err.to_string(),
            });
        }

        let draw_args = self.read_draw_args(&buffers).await?;

        let capacity = params.quad_count * PACKED_ENTRIES_PER_QUAD as u32;
        let entries = draw_args.packed_entry_count();
        if entries > capacity {
            return Err(CullError::InvalidInput(format!(
                "draw count {} exceeds output capacity {}",
                entries, capacity
            )));
        }
        let packed_indices = if entries == 0 {
            Vec::new()
        } else {
            self.readback_indices(&buffers.out_indices, entries).await?
        };

        let visible_quads = draw_args.quad_count();
        log::debug!(
            "gpu cull: quads={} visible={} index_count={}",
            params.quad_count,
            visible_quads,
            draw_args.index_count
        );

        Ok(CullOutput {
            draw_args,
            packed_indices,
            stats: DispatchStats {
                quads: params.quad_count,
                workgroups,
                visible_quads,
                culled_quads: params.quad_count - visible_quads,
            },
        })
    }
}

// === Readback ===

impl GpuQuadCuller {
    /// Reads the draw arguments left by the last submitted culling pass.
    pub async fn read_draw_args(&self, buffers: &QuadCullBuffers) -> CullResult<DrawIndexedIndirectArgs> {
        let read_args = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("quad_culler.read_args"),
            size: DrawIndexedIndirectArgs::SIZE,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("quad_culler.read_args"),
            });
        encoder.copy_buffer_to_buffer(
            &buffers.draw_args,
            0,
            &read_args,
            0,
            DrawIndexedIndirectArgs::SIZE,
        );
        self.queue.submit([encoder.finish()]);
        self.device.poll(wgpu::Maintain::Wait);

        map_buffer::<DrawIndexedIndirectArgs>(&read_args, &self.device)
            .await?
            .first()
            .copied()
            .ok_or_else(|| CullError::BufferMap("draw args readback was empty".into()))
    }

    async fn readback_indices(&self, buffer: &wgpu::Buffer, entries: u32) -> CullResult<Vec<u32>> {
        let read_indices = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("quad_culler.read_indices"),
            size: entries as u64 * 4,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("quad_culler.readback"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &read_indices, 0, read_indices.size());
        self.queue.submit([encoder.finish()]);
        self.device.poll(wgpu::Maintain::Wait);

        map_buffer::<u32>(&read_indices, &self.device).await
    }
}
