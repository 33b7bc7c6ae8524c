//! Errors reported by the pool and its collaborators.

/// Errors that can occur during pool operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The backing allocator cannot supply the requested region, even after reclaiming idle regions.
    #[error("out of memory")]
    OutOfMemory,
    /// The pointer was not handed out by this pool, or was already returned.
    #[error("invalid pointer")]
    InvalidPointer,
    /// The configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Result alias for pool operations.
pub type Result<T> = core::result::Result<T, Error>;
