//! Visibility culling for batches of quads.
//!
//! Turns a packed index list (three `u32` entries per quad, two 16-bit
//! vertex indices per entry) into a compacted list of the quads that pass a
//! screen-space test, together with the argument block of an indexed
//! indirect draw covering exactly that list.
//!
//! The kernel runs either on the GPU ([`GpuQuadCuller`]) or on the CPU
//! ([`cull_quads_cpu`]). Both execute one invocation per quad and compact
//! survivors through a single atomic counter.
//!
//! # Example
//!
//! ```
//! use glam::Mat4;
//! use quad_culler::{cull_quads_cpu, pack_index_list, CullMode, CullOpts, CullParams, QuadBatch};
//!
//! let positions = vec![
//!     -0.5, -0.5, 0.0,
//!      0.5, -0.5, 0.0,
//!     -0.5,  0.5, 0.0,
//!      0.5,  0.5, 0.0,
//! ];
//! let indices = pack_index_list(&[0, 1, 2, 2, 1, 3]).unwrap();
//! let batch = QuadBatch::new(indices, positions);
//! let params = CullParams::for_batch(&batch, Mat4::IDENTITY);
//! let opts = CullOpts { mode: CullMode::ScreenBounds, ..CullOpts::default() };
//!
//! let output = cull_quads_cpu(&batch, &params, &opts).unwrap();
//! assert_eq!(output.draw_args.index_count, 6);
//! assert_eq!(output.draw_args.instance_count, 1);
//! ```

pub mod core;
pub mod error;
pub mod gpu;
pub mod packing;
pub mod reference_cpu;
pub mod visibility;

pub use crate::core::{
    dispatch_workgroups, CullMode, CullOpts, CullOutput, CullParams, DispatchStats,
    DrawIndexedIndirectArgs, QuadBatch, WORKGROUP_SIZE,
};
pub use crate::error::{CullError, CullResult};
pub use crate::gpu::{GpuQuadCuller, GpuQuadCullerConfig, QuadCullBuffers};
pub use crate::packing::{
    pack_index_list, pack_indices, unpack_index_list, unpack_indices, PackedIndexPair,
    QuadIndices,
};
pub use crate::reference_cpu::{cull_quads_cpu, CullKernel};
pub use crate::visibility::{classify_triangle, Visibility};
