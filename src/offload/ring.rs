//! Shared job ring.
//!
//! Design:
//! - A fixed number of pre-allocated slots, each sized for `capacity` balls.
//! - One atomic flag per slot drives ownership: the submitter writes a slot
//!   only while it is `Empty`, a worker writes it only after winning the
//!   `Pending -> Claimed` CAS, and the submitter reads it only after
//!   observing `Done`.
//! - Workers park on a shared notify counter; completion wakes the per-slot
//!   signal instead, so the submitter can wait on one specific job.
//! - Jobs complete in any order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crossbeam_utils::CachePadded;

use super::layout::{RingGeometry, SlotMeta, SlotState};
use super::region::SharedRegion;
use super::signal::{NotifyCounter, Signal, WaitStrategy};
use crate::consts::NO_HIT;
use crate::error::{BatchError, OffloadError};
use crate::sim::{ArenaBounds, Ball, BatchBuffers, JobOutput, KernelParams, StepContext};

/// A slot's flag and declared count, on their own cache line
#[derive(Debug)]
struct SlotHeader {
    flag: AtomicU32,
    count: AtomicU32,
}

impl SlotHeader {
    fn new() -> Self {
        Self {
            flag: AtomicU32::new(SlotState::Empty.as_u32()),
            count: AtomicU32::new(0),
        }
    }
}

pub struct SharedJobRing {
    geometry: RingGeometry,
    headers: Box<[CachePadded<SlotHeader>]>,
    meta: SharedRegion<SlotMeta>,
    positions: SharedRegion<f32>,
    velocities: SharedRegion<f32>,
    radii: SharedRegion<f32>,
    damages: SharedRegion<f32>,
    hits: SharedRegion<i32>,
    notify: NotifyCounter,
    done_signals: Box<[Signal]>,
}

impl SharedJobRing {
    /// Allocate the ring. Returns the shared handle for workers and the one
    /// submitter allowed to fill slots.
    pub fn initialize(
        ring_size: usize,
        capacity: usize,
    ) -> Result<(Arc<Self>, JobSubmitter), OffloadError> {
        let geometry = RingGeometry::new(ring_size, capacity)?;
        let ring = Arc::new(Self {
            geometry,
            headers: (0..ring_size)
                .map(|_| CachePadded::new(SlotHeader::new()))
                .collect(),
            meta: SharedRegion::new(ring_size, 1, SlotMeta::default()),
            positions: SharedRegion::new(ring_size, geometry.vec3_stride(), 0.0),
            velocities: SharedRegion::new(ring_size, geometry.vec3_stride(), 0.0),
            radii: SharedRegion::new(ring_size, geometry.scalar_stride(), 0.0),
            damages: SharedRegion::new(ring_size, geometry.scalar_stride(), 0.0),
            hits: SharedRegion::new(ring_size, geometry.scalar_stride(), NO_HIT),
            notify: NotifyCounter::new(),
            done_signals: (0..ring_size).map(|_| Signal::new()).collect(),
        });
        log::debug!(
            "Job ring initialized: {} slots x {} balls ({} floats per vec3 array)",
            ring_size,
            capacity,
            ring.positions.len()
        );
        let submitter = JobSubmitter::new(Arc::clone(&ring));
        Ok((ring, submitter))
    }

    pub fn geometry(&self) -> RingGeometry {
        self.geometry
    }

    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        SlotState::from_u32(self.headers.get(slot)?.flag.load(Ordering::Acquire))
    }

    pub fn notifier(&self) -> &NotifyCounter {
        &self.notify
    }

    /// Wake every worker parked on the notify counter
    pub fn wake_workers(&self) {
        self.notify.bump();
    }

    /// Try to take ownership of any pending slot
    pub fn try_claim_any(&self) -> Option<ClaimedSlot<'_>> {
        (0..self.geometry.ring_size).find_map(|slot| self.try_claim(slot))
    }

    /// Try to take ownership of one specific slot
    pub fn try_claim(&self, slot: usize) -> Option<ClaimedSlot<'_>> {
        self.headers
            .get(slot)?
            .flag
            .compare_exchange(
                SlotState::Pending.as_u32(),
                SlotState::Claimed.as_u32(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;
        Some(ClaimedSlot {
            ring: self,
            slot,
            completed: false,
        })
    }

    fn publish_done(&self, slot: usize) {
        self.headers[slot].flag.store(SlotState::Done.as_u32(), Ordering::Release);
        self.done_signals[slot].notify_one();
    }

    /// Stand-in for a submitter that declared more balls than fit
    #[cfg(test)]
    pub(crate) fn overwrite_count(&self, slot: usize, count: u32) {
        self.headers[slot].count.store(count, Ordering::Release);
    }
}

/// Exclusive worker ownership of one slot, from claim to completion.
///
/// Dropping without [`ClaimedSlot::complete`] still publishes `Done`, so a
/// slot is never left hung in `Claimed`.
pub struct ClaimedSlot<'a> {
    ring: &'a SharedJobRing,
    slot: usize,
    completed: bool,
}

impl ClaimedSlot<'_> {
    pub fn index(&self) -> usize {
        self.slot
    }

    /// Declared ball count, checked against the slot capacity
    pub fn count(&self) -> Result<usize, BatchError> {
        let count = self.ring.headers[self.slot].count.load(Ordering::Acquire) as usize;
        let capacity = self.ring.geometry.capacity;
        if count > capacity {
            return Err(BatchError::CountExceedsCapacity { count, capacity });
        }
        Ok(count)
    }

    pub fn meta(&self) -> SlotMeta {
        // SAFETY: this worker owns the slot
        unsafe { self.ring.meta.slot(self.slot)[0] }
    }

    pub fn step_context(&self, params: KernelParams) -> StepContext {
        let meta = self.meta();
        StepContext::new(meta.arena(), meta.delta, params)
    }

    pub fn set_brick_generation(&mut self, generation: u32) {
        // SAFETY: this worker owns the slot
        unsafe { self.ring.meta.slot_mut(self.slot)[0].brick_generation = generation };
    }

    /// The slot's region of every data array
    pub fn buffers(&mut self) -> BatchBuffers<'_> {
        let ring = self.ring;
        let slot = self.slot;
        // SAFETY: the CAS made this worker the slot's only writer; the
        // returned views borrow `self` mutably so they cannot alias.
        unsafe {
            BatchBuffers {
                positions: ring.positions.slot_mut(slot),
                velocities: ring.velocities.slot_mut(slot),
                radii: ring.radii.slot(slot),
                damages: ring.damages.slot(slot),
                hits: ring.hits.slot_mut(slot),
            }
        }
    }

    /// Turn the job into a no-op result: zero rows, failure flagged
    pub fn mark_failed(&mut self) {
        self.ring.headers[self.slot].count.store(0, Ordering::Release);
        // SAFETY: this worker owns the slot
        unsafe {
            self.ring.meta.slot_mut(self.slot)[0].failed = 1;
            self.ring.hits.slot_mut(self.slot).fill(NO_HIT);
        }
    }

    /// Publish `Claimed -> Done` and wake the slot's waiter
    pub fn complete(mut self) {
        self.completed = true;
        self.ring.publish_done(self.slot);
    }
}

impl Drop for ClaimedSlot<'_> {
    fn drop(&mut self) {
        if !self.completed {
            log::warn!("Slot {} released without completion; publishing no-op", self.slot);
            self.mark_failed();
            self.ring.publish_done(self.slot);
        }
    }
}

/// A finished slot, copied out of shared memory
#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub slot: usize,
    pub output: JobOutput,
    pub brick_generation: u32,
    pub failed: bool,
}

/// Submitter-side bookkeeping for one in-flight slot
#[derive(Debug, Clone, Default)]
struct InFlight {
    ids: Vec<String>,
}

/// The single producer side of the ring.
///
/// Only one exists per ring, so "slot is `Empty`" is enough to own it for
/// writing.
pub struct JobSubmitter {
    ring: Arc<SharedJobRing>,
    in_flight: Vec<Option<InFlight>>,
    next_hint: usize,
}

impl JobSubmitter {
    fn new(ring: Arc<SharedJobRing>) -> Self {
        let ring_size = ring.geometry.ring_size;
        Self {
            ring,
            in_flight: vec![None; ring_size],
            next_hint: 0,
        }
    }

    /// Slots currently holding a submitted, untaken job
    pub fn in_flight(&self) -> usize {
        self.in_flight.iter().filter(|s| s.is_some()).count()
    }

    /// Slots the submitter may fill right now
    pub fn free_slots(&self) -> usize {
        (0..self.ring.geometry.ring_size)
            .filter(|&slot| self.is_free(slot))
            .count()
    }

    fn is_free(&self, slot: usize) -> bool {
        self.in_flight[slot].is_none() && self.ring.slot_state(slot) == Some(SlotState::Empty)
    }

    /// Submit starting from the rotating hint
    pub fn submit(&mut self, balls: &[Ball], delta: f32, arena: &ArenaBounds) -> Option<usize> {
        let slot = self.submit_at(self.next_hint, balls, delta, arena)?;
        self.next_hint = self.ring.geometry.next_slot(slot);
        Some(slot)
    }

    /// Fill the first `Empty` slot at or after `slot_hint` and mark it
    /// `Pending`. Returns `None` when the ring is full (backpressure) or the
    /// batch exceeds slot capacity.
    pub fn submit_at(
        &mut self,
        slot_hint: usize,
        balls: &[Ball],
        delta: f32,
        arena: &ArenaBounds,
    ) -> Option<usize> {
        let geometry = self.ring.geometry;
        if balls.len() > geometry.capacity {
            log::warn!(
                "Job of {} balls exceeds slot capacity {}",
                balls.len(),
                geometry.capacity
            );
            return None;
        }

        let slot = geometry.slots_from(slot_hint).find(|&s| self.is_free(s))?;
        let ring = &self.ring;

        // SAFETY: slot is Empty and this is the ring's only submitter, so no
        // worker can touch it until we publish Pending below.
        unsafe {
            let positions = ring.positions.slot_mut(slot);
            let velocities = ring.velocities.slot_mut(slot);
            let radii = ring.radii.slot_mut(slot);
            let damages = ring.damages.slot_mut(slot);
            for (i, ball) in balls.iter().enumerate() {
                positions[i * 3..i * 3 + 3].copy_from_slice(&ball.position.to_array());
                velocities[i * 3..i * 3 + 3].copy_from_slice(&ball.velocity.to_array());
                radii[i] = ball.radius;
                damages[i] = ball.damage;
            }
            ring.hits.slot_mut(slot)[..balls.len()].fill(NO_HIT);
            ring.meta.slot_mut(slot)[0] = SlotMeta::new(delta, arena);
        }
        ring.headers[slot].count.store(balls.len() as u32, Ordering::Release);

        self.in_flight[slot] = Some(InFlight {
            ids: balls.iter().map(|b| b.id.clone()).collect(),
        });
        ring.headers[slot].flag.store(SlotState::Pending.as_u32(), Ordering::Release);
        ring.notify.bump();
        Some(slot)
    }

    /// Non-blocking poll of one slot
    pub fn try_take_result(&mut self, slot: usize) -> Option<CompletedJob> {
        if self.ring.slot_state(slot)? != SlotState::Done {
            return None;
        }
        let in_flight = self.in_flight.get_mut(slot)?.take().unwrap_or_default();
        let ring = &self.ring;
        let count = (ring.headers[slot].count.load(Ordering::Acquire) as usize).min(ring.geometry.capacity);

        // SAFETY: Done was observed with Acquire; the worker no longer
        // touches the slot and nobody else reads it until we flip it Empty.
        let job = unsafe {
            let meta = ring.meta.slot(slot)[0];
            let mut ids = in_flight.ids;
            ids.truncate(count);
            CompletedJob {
                slot,
                output: JobOutput {
                    positions: ring.positions.slot(slot)[..count * 3].to_vec(),
                    velocities: ring.velocities.slot(slot)[..count * 3].to_vec(),
                    hit_indices: ring.hits.slot(slot)[..count].to_vec(),
                    count,
                    ids: Some(ids),
                    hit_brick_ids: Vec::new(),
                },
                brick_generation: meta.brick_generation,
                failed: meta.is_failed(),
            }
        };

        ring.headers[slot].flag.store(SlotState::Empty.as_u32(), Ordering::Release);
        Some(job)
    }

    /// Non-blocking poll of every in-flight slot; first finished one wins
    pub fn try_take_any(&mut self) -> Option<CompletedJob> {
        let slots: Vec<usize> = (0..self.in_flight.len())
            .filter(|&s| self.in_flight[s].is_some())
            .collect();
        slots.into_iter().find_map(|slot| self.try_take_result(slot))
    }

    /// Wait on one slot's completion signal, then take it
    pub fn wait_for_result(
        &mut self,
        slot: usize,
        strategy: WaitStrategy,
        timeout: Duration,
    ) -> Option<CompletedJob> {
        let ring = Arc::clone(&self.ring);
        let signal = ring.done_signals.get(slot)?;
        signal.wait_until(
            || ring.slot_state(slot) == Some(SlotState::Done),
            strategy,
            timeout,
        );
        self.try_take_result(slot)
    }

    /// Oldest-first is not tracked; waits on the lowest in-flight slot
    pub fn wait_for_any(&mut self, strategy: WaitStrategy, timeout: Duration) -> Option<CompletedJob> {
        if let Some(job) = self.try_take_any() {
            return Some(job);
        }
        let slot = self.in_flight.iter().position(|s| s.is_some())?;
        self.wait_for_result(slot, strategy, timeout)
    }
}
