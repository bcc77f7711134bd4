//! Error types for the offload core
//!
//! None of these reach the player. Batch and result errors degrade to
//! "skip this frame's offloaded update"; only initialization failures
//! surface, as a capability downgrade.

use thiserror::Error;

/// Shared-buffer geometry violations detected before the kernel indexes anything
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("{buffer} buffer too short: need {needed} elements, have {actual}")]
    BufferTooShort {
        buffer: &'static str,
        needed: usize,
        actual: usize,
    },
    #[error("job count {count} exceeds slot capacity {capacity}")]
    CountExceedsCapacity { count: usize, capacity: usize },
    #[error("{buffer} buffer cannot be viewed as vec3 rows")]
    Misaligned { buffer: &'static str },
}

/// Reasons a completed job is discarded during reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResultRejected {
    #[error("position/velocity length mismatch ({positions} vs {velocities})")]
    ShapeMismatch { positions: usize, velocities: usize },
    #[error("result length {len} is not a multiple of 3")]
    NotTriplets { len: usize },
    #[error("non-finite value in {buffer} at index {index}")]
    NonFinite { buffer: &'static str, index: usize },
}

/// Configuration loading/validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse offload config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid offload config: {0}")]
    Invalid(String),
}

/// Offload initialization failures
#[derive(Debug, Error)]
pub enum OffloadError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid ring geometry: ring_size={ring_size}, capacity={capacity}")]
    InvalidGeometry { ring_size: usize, capacity: usize },
    #[error("failed to spawn physics worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}
