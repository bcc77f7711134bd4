//! Physics simulation module
//!
//! Everything here is pure and thread-agnostic:
//! - `kernel`: one ball, one step
//! - `batch`: the kernel over flat slot buffers
//! - `reconcile`: worker output back into live, id-bearing balls
//! - `sync`: the on-thread fallback when offloading is unavailable

pub mod batch;
pub mod kernel;
pub mod reconcile;
pub mod state;
pub mod sync;

pub use batch::{BatchBuffers, BatchSummary, simulate_batch, simulate_batch_ids};
pub use kernel::{KernelParams, KernelStep, StepContext, step_ball};
pub use reconcile::{
    ApplyOptions, ApplyOutcome, BrickHit, ContactInfo, JobOutput, apply_result_to_balls,
};
pub use state::{ArenaBounds, Ball, BallColor, Brick, BrickKind, BrickSnapshot};
pub use sync::step_balls;
