//! CPU execution of the culling kernel.
//!
//! Mirrors the GPU dispatch one invocation per quad: the invocations share
//! nothing but the atomic index counter and the output slots, and survivors
//! land in the output in the order their reservations resolved.

use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::Zeroable;
use rayon::prelude::*;

use crate::core::{
    dispatch_workgroups, CullMode, CullOpts, CullOutput, CullParams, DispatchStats,
    DrawIndexedIndirectArgs, QuadBatch, WORKGROUP_SIZE,
};
use crate::error::CullResult;
use crate::packing::{QuadIndices, INDICES_PER_QUAD, PACKED_ENTRIES_PER_QUAD};
use crate::visibility::{classify_triangle, gather_position};

/// Shared targets of one dispatch plus the read-only inputs it runs over.
///
/// Targets start in the reset state. [`CullKernel::reset`] takes `&mut self`
/// while every invocation takes `&self`, so a reset can never overlap a
/// publish.
pub struct CullKernel<'a> {
    batch: &'a QuadBatch,
    params: CullParams,
    mode: CullMode,
    index_count: AtomicU32,
    draw_args: DrawIndexedIndirectArgs,
    out_indices: Vec<AtomicU32>,
}

impl<'a> CullKernel<'a> {
    /// Allocates an output stream of `3 * quad_count` entries (every quad may
    /// survive) and resets the draw arguments.
    ///
    /// Fails when `params` does not fit `batch` (see [`CullParams::validate`]).
    /// Vertex indices are not checked here; use
    /// [`QuadBatch::validate_indices`] for untrusted data.
    pub fn new(batch: &'a QuadBatch, params: CullParams, mode: CullMode) -> CullResult<Self> {
        params.validate(batch)?;
        let capacity = params.quad_count as usize * PACKED_ENTRIES_PER_QUAD;
        let mut kernel = Self {
            batch,
            params,
            mode,
            index_count: AtomicU32::new(0),
            draw_args: DrawIndexedIndirectArgs::zeroed(),
            out_indices: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
        };
        kernel.reset();
        Ok(kernel)
    }

    /// Reset pass. Stale output entries are left in place.
    pub fn reset(&mut self) {
        self.draw_args = DrawIndexedIndirectArgs::RESET;
        *self.index_count.get_mut() = 0;
    }

    pub fn workgroups(&self) -> u32 {
        dispatch_workgroups(self.params.quad_count, WORKGROUP_SIZE)
    }

    /// Number of invocations a dispatch launches, including the idle tail of
    /// the last workgroup.
    pub fn invocation_count(&self) -> u32 {
        self.workgroups() * WORKGROUP_SIZE
    }

    /// One invocation of the kernel.
    ///
    /// # Panics
    /// Panics if the quad references a vertex past the end of the position
    /// buffer.
    pub fn invoke(&self, global_id: u32) {
        let quad_id = global_id;
        if quad_id >= self.params.quad_count {
            return;
        }

        let base = quad_id as usize * PACKED_ENTRIES_PER_QUAD;
        let entries = [
            self.batch.packed_indices[base],
            self.batch.packed_indices[base + 1],
            self.batch.packed_indices[base + 2],
        ];
        let triangle = QuadIndices::from_raw(entries)
            .first_triangle()
            .map(|index| gather_position(&self.batch.positions, index));

        if !classify_triangle(triangle, self.params.view_proj, self.mode).is_visible() {
            return;
        }

        // A single RMW hands out disjoint slots; slot contents are only read
        // after the dispatch joins, so no stronger ordering is needed.
        let reserved = self
            .index_count
            .fetch_add(INDICES_PER_QUAD as u32, Ordering::Relaxed);
        let slot = (reserved / 2) as usize;
        for (offset, entry) in entries.into_iter().enumerate() {
            self.out_indices[slot + offset].store(entry, Ordering::Relaxed);
        }
    }

    /// Runs every invocation on the rayon pool and returns once all of them
    /// have completed.
    pub fn dispatch_parallel(&self) {
        (0..self.invocation_count())
            .into_par_iter()
            .for_each(|global_id| self.invoke(global_id));
    }

    /// Runs invocations sequentially in the given order.
    pub fn dispatch_in_order<I>(&self, order: I)
    where
        I: IntoIterator<Item = u32>,
    {
        for global_id in order {
            self.invoke(global_id);
        }
    }

    /// Completion boundary: consumes the kernel and reads back the targets.
    pub fn finish(self) -> CullOutput {
        let quads = self.params.quad_count;
        let workgroups = self.workgroups();
        let draw_args = DrawIndexedIndirectArgs {
            index_count: self.index_count.into_inner(),
            ..self.draw_args
        };
        let packed_indices: Vec<u32> = self
            .out_indices
            .into_iter()
            .take(draw_args.packed_entry_count() as usize)
            .map(AtomicU32::into_inner)
            .collect();
        let visible_quads = draw_args.quad_count();

        CullOutput {
            draw_args,
            packed_indices,
            stats: DispatchStats {
                quads,
                workgroups,
                visible_quads,
                culled_quads: quads - visible_quads,
            },
        }
    }
}

/// Cull a batch on the CPU.
pub fn cull_quads_cpu(
    batch: &QuadBatch,
    params: &CullParams,
    opts: &CullOpts,
) -> CullResult<CullOutput> {
    params.validate(batch)?;
    if opts.validate_indices {
        batch.validate_indices(params.quad_count)?;
    }

    let kernel = CullKernel::new(batch, *params, opts.mode)?;
    log::debug!(
        "cpu cull: quads={} workgroups={} mode={:?}",
        params.quad_count,
        kernel.workgroups(),
        opts.mode
    );
    kernel.dispatch_parallel();
    let output = kernel.finish();
    log::debug!(
        "cpu cull: visible={} culled={} index_count={}",
        output.stats.visible_quads,
        output.stats.culled_quads,
        output.draw_args.index_count
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    use crate::packing::pack_indices;

    /// Appends a quad whose first vertex sits at `origin`, returning its
    /// packed entries.
    fn push_quad(batch: &mut QuadBatch, origin: [f32; 2], size: f32) -> [u32; 3] {
        let base = batch.vertex_count() as u16;
        let [x, y] = origin;
        batch.positions.extend_from_slice(&[
            x, y, 0.0, //
            x + size, y, 0.0, //
            x, y + size, 0.0, //
            x + size, y + size, 0.0,
        ]);
        let entries = [
            pack_indices(base, base + 1),
            pack_indices(base + 2, base + 2),
            pack_indices(base + 1, base + 3),
        ];
        batch.packed_indices.extend_from_slice(&entries);
        entries
    }

    fn screen_opts() -> CullOpts {
        CullOpts {
            mode: CullMode::ScreenBounds,
            ..CullOpts::default()
        }
    }

    fn as_triples(packed: &[u32]) -> Vec<[u32; 3]> {
        packed.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect()
    }

    #[test]
    fn mixed_batch_keeps_only_visible_quads() {
        let mut batch = QuadBatch::default();
        let q0 = push_quad(&mut batch, [-0.5, -0.5], 1.0);
        let q1 = push_quad(&mut batch, [2.0, 2.0], 1.0);
        let q2 = push_quad(&mut batch, [-0.25, -0.25], 0.5);
        let params = CullParams::for_batch(&batch, Mat4::IDENTITY);

        let output = cull_quads_cpu(&batch, &params, &screen_opts()).expect("cull");

        assert_eq!(output.draw_args.index_count, 12);
        assert_eq!(output.packed_indices.len(), 6);
        let triples: HashSet<[u32; 3]> = as_triples(&output.packed_indices).into_iter().collect();
        assert_eq!(triples, HashSet::from([q0, q2]));
        assert!(!output.packed_indices.iter().any(|entry| q1.contains(entry)));
        assert_eq!(
            output.stats,
            DispatchStats {
                quads: 3,
                workgroups: 1,
                visible_quads: 2,
                culled_quads: 1,
            }
        );
    }

    #[test]
    fn reference_mode_classifies_by_first_vertex_x() {
        let mut batch = QuadBatch::default();
        let left = push_quad(&mut batch, [-3.0, 7.0], 1.0);
        let _right = push_quad(&mut batch, [0.25, 0.0], 0.1);
        let params = CullParams::for_batch(&batch, Mat4::IDENTITY);

        let output = cull_quads_cpu(&batch, &params, &CullOpts::default()).expect("cull");

        assert_eq!(output.draw_args.index_count, 6);
        assert_eq!(output.packed_indices, left.to_vec());
    }

    #[test]
    fn empty_dispatch_leaves_reset_args() {
        let batch = QuadBatch::default();
        let params = CullParams::for_batch(&batch, Mat4::IDENTITY);
        let output = cull_quads_cpu(&batch, &params, &screen_opts()).expect("cull");
        assert_eq!(output.draw_args, DrawIndexedIndirectArgs::RESET);
        assert!(output.is_empty());
        assert_eq!(output.stats.workgroups, 0);
    }

    #[test]
    fn quad_count_limits_the_dispatch() {
        let mut batch = QuadBatch::default();
        let q0 = push_quad(&mut batch, [-0.5, -0.5], 1.0);
        push_quad(&mut batch, [-0.5, -0.5], 1.0);
        let params = CullParams {
            quad_count: 1,
            view_proj: Mat4::IDENTITY,
        };
        let output = cull_quads_cpu(&batch, &params, &screen_opts()).expect("cull");
        assert_eq!(output.packed_indices, q0.to_vec());
    }

    #[test]
    fn out_of_range_index_is_rejected_before_dispatch() {
        let mut batch = QuadBatch::default();
        push_quad(&mut batch, [0.0, 0.0], 1.0);
        batch.packed_indices[1] = pack_indices(40, 2);
        let params = CullParams::for_batch(&batch, Mat4::IDENTITY);
        assert!(cull_quads_cpu(&batch, &params, &screen_opts()).is_err());
    }

    #[test]
    fn reset_clears_previous_counts() {
        let mut batch = QuadBatch::default();
        push_quad(&mut batch, [-0.5, -0.5], 1.0);
        let params = CullParams::for_batch(&batch, Mat4::IDENTITY);
        let mut kernel = CullKernel::new(&batch, params, CullMode::ScreenBounds).expect("kernel");
        kernel.dispatch_parallel();
        kernel.reset();
        kernel.dispatch_parallel();
        let output = kernel.finish();
        assert_eq!(output.draw_args.index_count, 6);
        assert_eq!(output.draw_args.instance_count, 1);
    }

    #[test]
    fn kernel_rejects_quad_count_past_batch() {
        let mut batch = QuadBatch::default();
        push_quad(&mut batch, [-0.5, -0.5], 1.0);
        let params = CullParams {
            quad_count: 2,
            view_proj: Mat4::IDENTITY,
        };
        assert!(CullKernel::new(&batch, params, CullMode::ScreenBounds).is_err());
    }

    #[test]
    #[should_panic]
    fn unchecked_out_of_range_index_panics_invocation() {
        let mut batch = QuadBatch::default();
        push_quad(&mut batch, [0.0, 0.0], 1.0);
        batch.packed_indices[0] = pack_indices(40, 1);
        let params = CullParams::for_batch(&batch, Mat4::IDENTITY);
        let kernel = CullKernel::new(&batch, params, CullMode::ScreenBounds).expect("kernel");
        kernel.invoke(0);
    }

    #[test]
    fn idle_invocations_do_nothing() {
        let mut batch = QuadBatch::default();
        push_quad(&mut batch, [-0.5, -0.5], 1.0);
        let params = CullParams::for_batch(&batch, Mat4::IDENTITY);
        let kernel = CullKernel::new(&batch, params, CullMode::ScreenBounds).expect("kernel");
        assert_eq!(kernel.invocation_count(), 64);
        kernel.dispatch_in_order(1..64);
        let output = kernel.finish();
        assert_eq!(output.draw_args, DrawIndexedIndirectArgs::RESET);
    }

    #[test]
    fn all_visible_compaction_is_a_permutation() {
        let mut batch = QuadBatch::default();
        let mut expected = Vec::new();
        for i in 0..1000 {
            let offset = (i % 7) as f32 * 0.01;
            expected.push(push_quad(&mut batch, [-0.5 + offset, -0.5], 0.5));
        }
        let params = CullParams::for_batch(&batch, Mat4::IDENTITY);
        let output = cull_quads_cpu(&batch, &params, &screen_opts()).expect("cull");

        let n = expected.len() as u32;
        assert_eq!(output.draw_args.index_count, 6 * n);
        let mut got = as_triples(&output.packed_indices);
        got.sort_unstable();
        expected.sort_unstable();
        assert_eq!(got, expected);
    }

    #[test]
    fn random_interleavings_never_overlap() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
        for _ in 0..50 {
            let mut batch = QuadBatch::default();
            let mut visible = Vec::new();
            let quads = rng.gen_range(1..200);
            for _ in 0..quads {
                let x = rng.gen_range(-2.0f32..2.0);
                let y = rng.gen_range(-2.0f32..2.0);
                let entries = push_quad(&mut batch, [x, y], 0.25);
                if !(x + 0.25 < 0.0 || y + 0.25 < 0.0 || x > 0.0 || y > 0.0) {
                    visible.push(entries);
                }
            }
            let params = CullParams::for_batch(&batch, Mat4::IDENTITY);
            let kernel = CullKernel::new(&batch, params, CullMode::ScreenBounds).expect("kernel");
            let mut order: Vec<u32> = (0..kernel.invocation_count()).collect();
            order.shuffle(&mut rng);
            kernel.dispatch_in_order(order);
            let output = kernel.finish();

            assert_eq!(output.draw_args.index_count as usize, visible.len() * 6);
            let mut got = as_triples(&output.packed_indices);
            got.sort_unstable();
            visible.sort_unstable();
            assert_eq!(got, visible);
        }
    }
}
