//! Ring worker loop.
//!
//! `Idle -> Scanning -> Processing(slot) -> Idle`. A worker sweeps the ring
//! for a pending slot, claims it by CAS, runs the batch over the slot's own
//! region and publishes `Done`. With nothing to claim it parks on the ring's
//! notify counter. Every claimed slot reaches `Done`, even when validation
//! fails or the kernel panics.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::protocol::WorkerMessage;
use super::ring::{ClaimedSlot, SharedJobRing};
use super::signal::WaitStrategy;
use crate::sim::{BatchSummary, BrickSnapshot, KernelParams, simulate_batch};

/// Ring worker state machine. Message workers report `Idle` throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerPhase {
    #[default]
    Idle,
    Scanning,
    Processing(usize),
}

impl WorkerPhase {
    fn encode(self) -> u64 {
        match self {
            WorkerPhase::Idle => 0,
            WorkerPhase::Scanning => 1,
            WorkerPhase::Processing(slot) => 2 + slot as u64,
        }
    }

    fn decode(word: u64) -> Self {
        match word {
            0 => WorkerPhase::Idle,
            1 => WorkerPhase::Scanning,
            n => WorkerPhase::Processing((n - 2) as usize),
        }
    }
}

/// Counters shared between a worker and its owner
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub balls_simulated: AtomicU64,
    pub brick_hits: AtomicU64,
    pub wakeups: AtomicU64,
    /// Encoded [`WorkerPhase`]
    phase: AtomicU64,
}

impl WorkerStats {
    pub fn snapshot(&self, worker: usize) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            worker,
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            balls_simulated: self.balls_simulated.load(Ordering::Relaxed),
            brick_hits: self.brick_hits.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            phase: self.phase(),
        }
    }

    /// What the worker is doing right now
    pub fn phase(&self) -> WorkerPhase {
        WorkerPhase::decode(self.phase.load(Ordering::Relaxed))
    }

    pub(crate) fn set_phase(&self, phase: WorkerPhase) {
        self.phase.store(phase.encode(), Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self, summary: &BatchSummary) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.balls_simulated
            .fetch_add(summary.balls as u64, Ordering::Relaxed);
        self.brick_hits
            .fetch_add(summary.hits as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatsSnapshot {
    pub worker: usize,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub balls_simulated: u64,
    pub brick_hits: u64,
    pub wakeups: u64,
    pub phase: WorkerPhase,
}

/// Tunables handed to every worker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerSettings {
    pub params: KernelParams,
    pub wait: WaitStrategy,
    /// Upper bound on one park; control messages are re-checked after it
    pub idle_wait: Duration,
}

/// Everything one ring worker owns
pub struct WorkerContext {
    id: usize,
    ring: Arc<SharedJobRing>,
    control: Receiver<WorkerMessage>,
    bricks: Arc<BrickSnapshot>,
    settings: WorkerSettings,
    stats: Arc<WorkerStats>,
    #[cfg(test)]
    fail_next_job: bool,
}

impl WorkerContext {
    pub fn new(
        id: usize,
        ring: Arc<SharedJobRing>,
        control: Receiver<WorkerMessage>,
        settings: WorkerSettings,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            id,
            ring,
            control,
            bricks: Arc::new(BrickSnapshot::default()),
            settings,
            stats,
            #[cfg(test)]
            fail_next_job: false,
        }
    }

    /// Block until `Init` arrives, then run until `Shutdown`
    pub fn run(mut self) {
        if !self.await_init() {
            return;
        }
        log::info!("Physics worker {} started", self.id);

        loop {
            // Read the counter before scanning so a submit racing the scan
            // still ends the wait below.
            let observed = self.ring.notifier().current();
            if !self.drain_control() {
                break;
            }

            self.stats.set_phase(WorkerPhase::Scanning);
            let ring = Arc::clone(&self.ring);
            if let Some(claim) = ring.try_claim_any() {
                self.process(claim);
                self.stats.set_phase(WorkerPhase::Idle);
                continue;
            }

            self.stats.set_phase(WorkerPhase::Idle);
            if self.ring.notifier().wait_for_change(
                observed,
                self.settings.wait,
                self.settings.idle_wait,
            ) {
                self.stats.wakeups.fetch_add(1, Ordering::Relaxed);
            }
        }

        log::info!("Physics worker {} stopped", self.id);
    }

    fn await_init(&mut self) -> bool {
        loop {
            match self.control.recv() {
                Ok(WorkerMessage::Init {
                    bricks,
                    capacity,
                    ring_size,
                }) => {
                    let geometry = self.ring.geometry();
                    if geometry.capacity != capacity || geometry.ring_size != ring_size {
                        log::error!(
                            "Worker {} init geometry {}x{} does not match ring {}x{}",
                            self.id,
                            ring_size,
                            capacity,
                            geometry.ring_size,
                            geometry.capacity
                        );
                        return false;
                    }
                    self.bricks = bricks;
                    return true;
                }
                Ok(WorkerMessage::UpdateBricks { bricks }) => self.bricks = bricks,
                Ok(WorkerMessage::Shutdown) | Err(_) => return false,
            }
        }
    }

    /// Apply pending control messages. Returns false on shutdown.
    fn drain_control(&mut self) -> bool {
        loop {
            match self.control.try_recv() {
                Ok(WorkerMessage::UpdateBricks { bricks }) => {
                    log::debug!(
                        "Worker {} brick snapshot -> generation {} ({} bricks)",
                        self.id,
                        bricks.generation,
                        bricks.bricks.len()
                    );
                    self.bricks = bricks;
                }
                Ok(WorkerMessage::Init { .. }) => {
                    log::warn!("Worker {} ignoring repeated init", self.id);
                }
                Ok(WorkerMessage::Shutdown) => return false,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Run one claimed slot to `Done`
    fn process(&mut self, mut claim: ClaimedSlot<'_>) {
        let slot = claim.index();
        self.stats.set_phase(WorkerPhase::Processing(slot));

        let bricks = Arc::clone(&self.bricks);
        claim.set_brick_generation(bricks.generation);
        let ctx = claim.step_context(self.settings.params);
        #[cfg(test)]
        let fail = std::mem::take(&mut self.fail_next_job);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            #[cfg(test)]
            if fail {
                panic!("kernel fault in slot {slot}");
            }
            let count = claim.count()?;
            simulate_batch(count, &mut claim.buffers(), &ctx, &bricks.bricks)
        }));

        match outcome {
            Ok(Ok(summary)) => self.stats.record_success(&summary),
            Ok(Err(err)) => {
                log::warn!("Worker {} slot {}: {}; publishing no-op", self.id, slot, err);
                claim.mark_failed();
                self.stats.record_failure();
            }
            Err(_) => {
                log::error!("Worker {} slot {}: kernel panicked; publishing no-op", self.id, slot);
                claim.mark_failed();
                self.stats.record_failure();
            }
        }
        claim.complete();
    }
}
