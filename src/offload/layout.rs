//! Shared job ring layout contract.
//!
//! The ring is a fixed number of slots. Each slot owns a fixed-stride region
//! of every data array, addressed by slot index:
//!
//! - slot header: [`SlotState`] as a `u32` plus the slot's ball count,
//!   padded to its own cache line
//! - `meta[slot]`: [`SlotMeta`]
//! - `positions`/`velocities`: `capacity * 3` floats per slot
//! - `radii`/`damages`: `capacity` floats per slot
//! - `hits`: `capacity` `i32` brick indices per slot (`NO_HIT` = none)

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::OffloadError;
use crate::sim::ArenaBounds;

/// Slot lifecycle: `Empty -> Pending -> Claimed -> Done -> Empty`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum SlotState {
    /// Free for the submitter to fill
    Empty = 0,
    /// Filled, waiting for a worker
    Pending = 1,
    /// Owned by exactly one worker
    Claimed = 2,
    /// Results ready for the submitter
    Done = 3,
}

impl SlotState {
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(SlotState::Empty),
            1 => Some(SlotState::Pending),
            2 => Some(SlotState::Claimed),
            3 => Some(SlotState::Done),
            _ => None,
        }
    }
}

/// Per-slot scalar metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct SlotMeta {
    pub delta: f32,
    pub arena_width: f32,
    pub arena_height: f32,
    pub arena_depth: f32,
    /// Brick snapshot generation the worker simulated against
    pub brick_generation: u32,
    /// Non-zero when the worker gave up on the job (no-op result)
    pub failed: u32,
}

impl SlotMeta {
    pub fn new(delta: f32, arena: &ArenaBounds) -> Self {
        Self {
            delta,
            arena_width: arena.width,
            arena_height: arena.height,
            arena_depth: arena.depth,
            ..Zeroable::zeroed()
        }
    }

    pub fn arena(&self) -> ArenaBounds {
        ArenaBounds::new(self.arena_width, self.arena_height, self.arena_depth)
    }

    pub fn is_failed(&self) -> bool {
        self.failed != 0
    }
}

/// Ring dimensions and slot arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingGeometry {
    pub ring_size: usize,
    /// Maximum balls per slot
    pub capacity: usize,
}

impl RingGeometry {
    pub fn new(ring_size: usize, capacity: usize) -> Result<Self, OffloadError> {
        // Slot indices and counts travel as u32 words
        if ring_size == 0
            || capacity == 0
            || ring_size > u32::MAX as usize
            || capacity
                .checked_mul(3)
                .and_then(|stride| stride.checked_mul(ring_size))
                .is_none_or(|n| n > u32::MAX as usize)
        {
            return Err(OffloadError::InvalidGeometry {
                ring_size,
                capacity,
            });
        }
        Ok(Self {
            ring_size,
            capacity,
        })
    }

    /// Floats per slot in the position/velocity arrays
    #[inline]
    pub fn vec3_stride(&self) -> usize {
        self.capacity * 3
    }

    /// Elements per slot in the radius/damage/hit arrays
    #[inline]
    pub fn scalar_stride(&self) -> usize {
        self.capacity
    }

    /// Total float count of one position/velocity array
    pub fn vec3_len(&self) -> usize {
        self.ring_size * self.vec3_stride()
    }

    /// Total element count of one radius/damage/hit array
    pub fn scalar_len(&self) -> usize {
        self.ring_size * self.scalar_stride()
    }

    /// Next slot after `slot`, wrapping
    #[inline]
    pub fn next_slot(&self, slot: usize) -> usize {
        (slot + 1) % self.ring_size
    }

    /// All slot indices starting at `hint`, wrapping once around the ring
    pub fn slots_from(&self, hint: usize) -> impl Iterator<Item = usize> + use<> {
        let ring_size = self.ring_size;
        let start = hint % ring_size;
        (0..ring_size).map(move |i| (start + i) % ring_size)
    }

    /// Number of slots needed for `balls` balls
    pub fn slots_for(&self, balls: usize) -> usize {
        balls.div_ceil(self.capacity)
    }
}
