use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::error::{CullError, CullResult};
use crate::packing::{QuadIndices, INDICES_PER_QUAD, PACKED_ENTRIES_PER_QUAD};

/// Invocations per workgroup in the reference sizing.
pub const WORKGROUP_SIZE: u32 = 64;

/// Number of workgroups needed to cover `quad_count` invocations.
pub fn dispatch_workgroups(quad_count: u32, workgroup_size: u32) -> u32 {
    let workgroup_size = workgroup_size.max(1);
    quad_count / workgroup_size + u32::from(quad_count % workgroup_size != 0)
}

/// Argument block of an indexed indirect draw.
///
/// Layout matches what `draw_indexed_indirect` consumes (20 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    /// State written by the reset pass: no indices, one instance, zero offsets.
    pub const RESET: Self = Self {
        index_count: 0,
        instance_count: 1,
        first_index: 0,
        base_vertex: 0,
        first_instance: 0,
    };

    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Number of surviving quads described by this block.
    pub fn quad_count(&self) -> u32 {
        self.index_count / INDICES_PER_QUAD as u32
    }

    /// Number of meaningful packed entries in the output index stream.
    pub fn packed_entry_count(&self) -> u32 {
        self.index_count / 2
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl Default for DrawIndexedIndirectArgs {
    fn default() -> Self {
        Self::RESET
    }
}

/// Input buffers of one dispatch.
#[derive(Debug, Clone, Default)]
pub struct QuadBatch {
    /// Packed index entries, three per quad.
    pub packed_indices: Vec<u32>,
    /// Flat xyz positions, three floats per vertex.
    pub positions: Vec<f32>,
}

impl QuadBatch {
    pub fn new(packed_indices: Vec<u32>, positions: Vec<f32>) -> Self {
        Self {
            packed_indices,
            positions,
        }
    }

    pub fn quad_count(&self) -> u32 {
        (self.packed_indices.len() / PACKED_ENTRIES_PER_QUAD) as u32
    }

    pub fn vertex_count(&self) -> u32 {
        (self.positions.len() / 3) as u32
    }

    pub fn quad(&self, quad_id: u32) -> Option<QuadIndices> {
        let base = quad_id as usize * PACKED_ENTRIES_PER_QUAD;
        let entries = self.packed_indices.get(base..base + PACKED_ENTRIES_PER_QUAD)?;
        Some(QuadIndices::from_raw([entries[0], entries[1], entries[2]]))
    }

    /// Checks buffer shapes and that the draw counter can hold every quad.
    pub fn validate(&self) -> CullResult<()> {
        if self.positions.len() % 3 != 0 {
            return Err(CullError::InvalidInput(format!(
                "positions length {} is not a multiple of 3",
                self.positions.len()
            )));
        }
        if self.packed_indices.len() % PACKED_ENTRIES_PER_QUAD != 0 {
            return Err(CullError::InvalidInput(format!(
                "packed index length {} is not a multiple of {}",
                self.packed_indices.len(),
                PACKED_ENTRIES_PER_QUAD
            )));
        }
        let quad_count = (self.packed_indices.len() / PACKED_ENTRIES_PER_QUAD) as u64;
        if quad_count * INDICES_PER_QUAD as u64 > u32::MAX as u64 {
            return Err(CullError::CounterOverflow { quad_count });
        }
        Ok(())
    }

    /// Checks every vertex index of the first `quad_count` quads against the
    /// position buffer.
    pub fn validate_indices(&self, quad_count: u32) -> CullResult<()> {
        let vertex_count = self.vertex_count();
        for quad_id in 0..quad_count {
            let quad = self.quad(quad_id).ok_or_else(|| {
                CullError::InvalidInput(format!("quad {quad_id} is past the end of the index buffer"))
            })?;
            if let Some(&index) = quad
                .vertex_indices()
                .iter()
                .find(|&&index| index as u32 >= vertex_count)
            {
                return Err(CullError::IndexOutOfRange {
                    quad: quad_id,
                    index,
                    vertex_count,
                });
            }
        }
        Ok(())
    }
}

/// Scalar parameters of one dispatch.
#[derive(Debug, Clone, Copy)]
pub struct CullParams {
    pub quad_count: u32,
    pub view_proj: Mat4,
}

impl CullParams {
    pub fn for_batch(batch: &QuadBatch, view_proj: Mat4) -> Self {
        Self {
            quad_count: batch.quad_count(),
            view_proj,
        }
    }

    pub fn validate(&self, batch: &QuadBatch) -> CullResult<()> {
        batch.validate()?;
        if self.quad_count > batch.quad_count() {
            return Err(CullError::InvalidInput(format!(
                "quad_count {} exceeds the {} quads in the index buffer",
                self.quad_count,
                batch.quad_count()
            )));
        }
        if !self.view_proj.is_finite() {
            return Err(CullError::InvalidInput("view_proj must be finite".into()));
        }
        Ok(())
    }
}

/// Classification rule applied by the visibility stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    /// Bit-compatible with the shipped kernel: the screen-space bounds are
    /// computed but the decision is overridden by the sign of the first
    /// vertex's world-space x (culled when `x > 0`).
    #[default]
    Reference,
    /// Culled when the clip-space xy bounding box lies entirely on the
    /// negative or positive side of zero on either axis.
    ScreenBounds,
}

impl CullMode {
    /// Value stored in the GPU parameter block.
    pub fn gpu_flag(self) -> u32 {
        match self {
            CullMode::Reference => 0,
            CullMode::ScreenBounds => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CullOpts {
    pub mode: CullMode,
    /// Check every vertex index against the position buffer before dispatch.
    /// When off, an out-of-range index panics the CPU dispatch.
    pub validate_indices: bool,
}

impl Default for CullOpts {
    fn default() -> Self {
        Self {
            mode: CullMode::default(),
            validate_indices: true,
        }
    }
}

/// Per-dispatch counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub quads: u32,
    pub workgroups: u32,
    pub visible_quads: u32,
    pub culled_quads: u32,
}

/// Result of a completed dispatch.
#[derive(Debug, Clone)]
pub struct CullOutput {
    pub draw_args: DrawIndexedIndirectArgs,
    /// The meaningful prefix of the output index stream, in reservation order.
    pub packed_indices: Vec<u32>,
    pub stats: DispatchStats,
}

impl CullOutput {
    pub fn is_empty(&self) -> bool {
        self.draw_args.index_count == 0
    }

    pub fn visible_quads(&self) -> impl Iterator<Item = QuadIndices> + '_ {
        self.packed_indices
            .chunks_exact(PACKED_ENTRIES_PER_QUAD)
            .map(|c| QuadIndices::from_raw([c[0], c[1], c[2]]))
    }

    /// Surviving vertex indices in decode order.
    pub fn index_list(&self) -> Vec<u16> {
        crate::packing::unpack_index_list(&self.packed_indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packing::pack_indices;

    fn unit_quad_batch() -> QuadBatch {
        QuadBatch::new(
            vec![pack_indices(0, 1), pack_indices(2, 2), pack_indices(1, 3)],
            vec![
                0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, //
                1.0, 1.0, 0.0,
            ],
        )
    }

    #[test]
    fn workgroups_round_up() {
        assert_eq!(dispatch_workgroups(0, WORKGROUP_SIZE), 0);
        assert_eq!(dispatch_workgroups(1, WORKGROUP_SIZE), 1);
        assert_eq!(dispatch_workgroups(64, WORKGROUP_SIZE), 1);
        assert_eq!(dispatch_workgroups(65, WORKGROUP_SIZE), 2);
        assert_eq!(dispatch_workgroups(u32::MAX, WORKGROUP_SIZE), 67_108_864);
    }

    #[test]
    fn draw_args_layout() {
        assert_eq!(DrawIndexedIndirectArgs::SIZE, 20);
        let args = DrawIndexedIndirectArgs {
            index_count: 12,
            ..DrawIndexedIndirectArgs::RESET
        };
        assert_eq!(args.quad_count(), 2);
        assert_eq!(args.packed_entry_count(), 6);
        assert_eq!(&args.as_bytes()[0..4], &12u32.to_ne_bytes());
        assert_eq!(&args.as_bytes()[4..8], &1u32.to_ne_bytes());
    }

    #[test]
    fn batch_counts() {
        let batch = unit_quad_batch();
        assert_eq!(batch.quad_count(), 1);
        assert_eq!(batch.vertex_count(), 4);
        assert_eq!(batch.quad(0).map(|q| q.first_triangle()), Some([0, 1, 2]));
        assert!(batch.quad(1).is_none());
        batch.validate().expect("valid");
        batch.validate_indices(1).expect("indices");
    }

    #[test]
    fn batch_rejects_ragged_buffers() {
        let mut batch = unit_quad_batch();
        batch.positions.pop();
        assert!(batch.validate().is_err());

        let mut batch = unit_quad_batch();
        batch.packed_indices.pop();
        assert!(batch.validate().is_err());
    }

    #[test]
    fn batch_reports_out_of_range_index() {
        let mut batch = unit_quad_batch();
        batch.packed_indices[2] = pack_indices(1, 9);
        match batch.validate_indices(1) {
            Err(CullError::IndexOutOfRange { quad, index, vertex_count }) => {
                assert_eq!((quad, index, vertex_count), (0, 9, 4));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn params_bounded_by_batch() {
        let batch = unit_quad_batch();
        let mut params = CullParams::for_batch(&batch, Mat4::IDENTITY);
        params.validate(&batch).expect("valid");
        params.quad_count = 2;
        assert!(params.validate(&batch).is_err());
        params.quad_count = 1;
        params.view_proj.x_axis.x = f32::NAN;
        assert!(params.validate(&batch).is_err());
    }
}
