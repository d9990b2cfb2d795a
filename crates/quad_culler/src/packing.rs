//! Packed 16-bit index pairs.
//!
//! Every producer and consumer of the culling index streams goes through this
//! module, so the bit layout lives in exactly one place.
//!
//! Bit layout of one packed entry (`u32`):
//! - Bits 16..32: first vertex index
//! - Bits  0..16: second vertex index
//!
//! Three consecutive entries describe one quad: six vertex indices forming two
//! triangles. The first triangle is `(e0.first, e0.second, e1.first)`.

use bytemuck::{Pod, Zeroable};

use crate::error::{CullError, CullResult};

/// Shift applied to the first index of a pair.
pub const FIRST_INDEX_SHIFT: u32 = 16;
/// Mask selecting the second index of a pair.
pub const SECOND_INDEX_MASK: u32 = 0xFFFF;

/// Number of packed entries per quad.
pub const PACKED_ENTRIES_PER_QUAD: usize = 3;
/// Number of vertex indices per quad (two triangles).
pub const INDICES_PER_QUAD: usize = 6;

/// Pack two 16-bit vertex indices into one entry.
#[inline]
pub fn pack_indices(first: u16, second: u16) -> u32 {
    ((first as u32) << FIRST_INDEX_SHIFT) | second as u32
}

/// Unpack one entry into `(first, second)`.
#[inline]
pub fn unpack_indices(packed: u32) -> (u16, u16) {
    (
        (packed >> FIRST_INDEX_SHIFT) as u16,
        (packed & SECOND_INDEX_MASK) as u16,
    )
}

/// One packed entry holding two vertex indices.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct PackedIndexPair(u32);

impl PackedIndexPair {
    #[inline]
    pub fn new(first: u16, second: u16) -> Self {
        Self(pack_indices(first, second))
    }

    #[inline]
    pub fn first(self) -> u16 {
        unpack_indices(self.0).0
    }

    #[inline]
    pub fn second(self) -> u16 {
        unpack_indices(self.0).1
    }

    #[inline]
    pub fn decode(self) -> (u16, u16) {
        unpack_indices(self.0)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for PackedIndexPair {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<PackedIndexPair> for u32 {
    fn from(pair: PackedIndexPair) -> Self {
        pair.0
    }
}

/// The three packed entries of a single quad.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct QuadIndices(pub [PackedIndexPair; PACKED_ENTRIES_PER_QUAD]);

impl QuadIndices {
    pub fn from_raw(raw: [u32; PACKED_ENTRIES_PER_QUAD]) -> Self {
        Self(raw.map(PackedIndexPair::from))
    }

    pub fn from_vertex_indices(indices: [u16; INDICES_PER_QUAD]) -> Self {
        Self([
            PackedIndexPair::new(indices[0], indices[1]),
            PackedIndexPair::new(indices[2], indices[3]),
            PackedIndexPair::new(indices[4], indices[5]),
        ])
    }

    pub fn raw(&self) -> [u32; PACKED_ENTRIES_PER_QUAD] {
        self.0.map(PackedIndexPair::raw)
    }

    /// All six vertex indices in decode order.
    pub fn vertex_indices(&self) -> [u16; INDICES_PER_QUAD] {
        let (a, b) = self.0[0].decode();
        let (c, d) = self.0[1].decode();
        let (e, f) = self.0[2].decode();
        [a, b, c, d, e, f]
    }

    /// Vertex indices of the triangle used for the visibility test.
    #[inline]
    pub fn first_triangle(&self) -> [u16; 3] {
        [self.0[0].first(), self.0[0].second(), self.0[1].first()]
    }
}

/// Pack a flat 16-bit index list (six indices per quad) into packed entries.
pub fn pack_index_list(indices: &[u16]) -> CullResult<Vec<u32>> {
    if indices.len() % INDICES_PER_QUAD != 0 {
        return Err(CullError::InvalidInput(format!(
            "index list length {} is not a multiple of {}",
            indices.len(),
            INDICES_PER_QUAD
        )));
    }
    Ok(indices
        .chunks_exact(2)
        .map(|pair| pack_indices(pair[0], pair[1]))
        .collect())
}

/// Expand packed entries back into a flat 16-bit index list.
pub fn unpack_index_list(packed: &[u32]) -> Vec<u16> {
    let mut out = Vec::with_capacity(packed.len() * 2);
    for &entry in packed {
        let (first, second) = unpack_indices(entry);
        out.push(first);
        out.push(second);
    }
    out
}
