use thiserror::Error;

/// Errors reported on the host side of a culling dispatch.
///
/// The kernel itself has no error channel. Everything here is detected before
/// the dispatch is issued (input validation, device limits) or while talking to
/// the device (adapter, validation scopes, buffer mapping).
#[derive(Debug, Error)]
pub enum CullError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("quad {quad} references vertex {index} but the position buffer holds {vertex_count} vertices")]
    IndexOutOfRange {
        quad: u32,
        index: u16,
        vertex_count: u32,
    },

    #[error("quad count {quad_count} overflows the 32-bit draw index counter")]
    CounterOverflow { quad_count: u64 },

    #[error("no GPU adapter available")]
    NoAdapter,

    #[error("failed to request device: {0}")]
    RequestDevice(String),

    #[error("{label} validation error: {message}")]
    Validation { label: &'static str, message: String },

    #[error("{label}: {value} exceeds device limit {limit}")]
    Limits {
        label: &'static str,
        value: u64,
        limit: u64,
    },

    #[error("buffer map failed: {0}")]
    BufferMap(String),
}

pub type CullResult<T> = Result<T, CullError>;
