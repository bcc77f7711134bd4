//! Idle Bricks - physics offload core for a ball-and-brick arena game
//!
//! Core modules:
//! - `sim`: Collision kernel, batch step, result reconciliation
//! - `offload`: Shared job ring, worker loop, message-passing fallback
//! - `config`: Offload configuration (JSON loadable)
//! - `platform`: Browser/native platform abstraction

pub mod config;
pub mod error;
pub mod offload;
pub mod platform;
pub mod sim;

pub use config::OffloadConfig;
pub use error::{BatchError, ConfigError, OffloadError, ResultRejected};
pub use offload::{OffloadCapability, PhysicsOffload, TransportKind};

/// Physics and ring configuration constants
pub mod consts {
    use glam::Vec3;

    /// Largest frame delta the kernel will integrate (avoids tunneling on lag spikes)
    pub const MAX_STEP_SECONDS: f32 = 1.0 / 20.0;
    /// Velocities are expressed in units per reference frame (60 Hz)
    pub const FRAME_SCALE: f32 = 60.0;

    /// Hit-index sentinel written when a ball touched no brick
    pub const NO_HIT: i32 = -1;

    /// Ring defaults
    pub const DEFAULT_RING_SIZE: usize = 4;
    pub const DEFAULT_CAPACITY: usize = 256;
    pub const DEFAULT_IDLE_WAIT_MS: u64 = 50;

    /// Ball defaults
    pub const BALL_RADIUS: f32 = 0.25;
    pub const BALL_DAMAGE: f32 = 1.0;

    /// Brick half-extents per brick kind
    pub const STANDARD_BRICK_HALF_EXTENTS: Vec3 = Vec3::new(1.0, 0.5, 0.5);
    pub const WIDE_BRICK_HALF_EXTENTS: Vec3 = Vec3::new(2.0, 0.5, 0.5);
    pub const CUBE_BRICK_HALF_EXTENTS: Vec3 = Vec3::new(0.5, 0.5, 0.5);

    /// Default critical hit multiplier
    pub const CRIT_MULTIPLIER: f32 = 2.0;
}

/// True when every value is finite (no NaN or infinity)
#[inline]
pub fn all_finite(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Index of the first non-finite value, if any
#[inline]
pub fn first_non_finite(values: &[f32]) -> Option<usize> {
    values.iter().position(|v| !v.is_finite())
}
