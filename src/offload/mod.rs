//! Physics offload
//!
//! The main-thread face of the worker pool:
//! - `ring`: shared-memory job slots (the fast path)
//! - `worker`: the ring worker loop
//! - `message`: owned-copy transport for runtimes without shared memory
//! - `protocol`: control messages both transports understand
//!
//! [`PhysicsOffload`] picks a transport once at construction. If no worker
//! can be started it reports [`OffloadCapability::Synchronous`] and callers
//! step physics on their own thread.

pub mod layout;
pub mod message;
pub mod protocol;
mod region;
pub mod ring;
pub mod signal;
pub mod worker;

use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::OffloadConfig;
use crate::error::OffloadError;
use crate::sim::{
    ApplyOptions, ApplyOutcome, ArenaBounds, Ball, Brick, BrickSnapshot, JobOutput, StepContext,
    step_balls,
};
use message::MessageWorker;
use protocol::{JobRequest, JobResponse, MessageEnvelope, WorkerMessage};
use ring::{CompletedJob, JobSubmitter, SharedJobRing};
use signal::WaitStrategy;
use worker::{WorkerContext, WorkerSettings, WorkerStats, WorkerStatsSnapshot};

pub use layout::{RingGeometry, SlotMeta, SlotState};

/// How jobs reach workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportKind {
    /// Zero-copy slots in shared memory
    #[default]
    SharedRing,
    /// Owned copies over channels
    MessagePassing,
}

/// What the rest of the application can rely on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffloadCapability {
    Offloaded(TransportKind),
    /// No workers; use [`PhysicsOffload::step_synchronous`]
    Synchronous,
}

/// Snapshots kept so late results resolve against the bricks they used
const BRICK_HISTORY: usize = 8;

struct BrickHistory {
    snapshots: VecDeque<Arc<BrickSnapshot>>,
}

impl BrickHistory {
    fn new(bricks: Vec<Brick>) -> Self {
        let mut snapshots = VecDeque::with_capacity(BRICK_HISTORY);
        snapshots.push_back(Arc::new(BrickSnapshot::new(0, bricks)));
        Self { snapshots }
    }

    fn current(&self) -> Arc<BrickSnapshot> {
        self.snapshots
            .back()
            .cloned()
            .unwrap_or_else(|| Arc::new(BrickSnapshot::default()))
    }

    fn push(&mut self, bricks: Vec<Brick>) -> Arc<BrickSnapshot> {
        let generation = self.current().generation.wrapping_add(1);
        let snapshot = Arc::new(BrickSnapshot::new(generation, bricks));
        if self.snapshots.len() == BRICK_HISTORY {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(Arc::clone(&snapshot));
        snapshot
    }

    fn resolve(&self, generation: u32, hit_indices: &[i32]) -> Vec<Option<String>> {
        let Some(snapshot) = self.snapshots.iter().find(|s| s.generation == generation) else {
            log::debug!("Brick generation {} expired; hit ids unresolved", generation);
            return vec![None; hit_indices.len()];
        };
        hit_indices
            .iter()
            .map(|&h| snapshot.brick_id(h).map(str::to_owned))
            .collect()
    }
}

struct WorkerHandle {
    join: Option<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

enum Transport {
    Shared {
        ring: Arc<SharedJobRing>,
        submitter: JobSubmitter,
        controls: Vec<Sender<WorkerMessage>>,
    },
    Message {
        inboxes: Vec<Sender<MessageEnvelope>>,
        responses: Receiver<JobResponse>,
        in_flight: usize,
        next_job: u64,
    },
    Synchronous,
}

/// Main-thread handle to the physics workers
pub struct PhysicsOffload {
    config: OffloadConfig,
    wait: WaitStrategy,
    transport: Transport,
    bricks: BrickHistory,
    workers: Vec<WorkerHandle>,
}

impl PhysicsOffload {
    /// Start workers, falling back to synchronous mode on any failure
    pub fn new(config: OffloadConfig, bricks: Vec<Brick>) -> Self {
        match Self::try_new(config.clone(), bricks.clone()) {
            Ok(offload) => offload,
            Err(err) => {
                log::warn!("Physics offload unavailable ({}); stepping synchronously", err);
                Self::synchronous(config, bricks)
            }
        }
    }

    /// Start workers, reporting why offloading is impossible
    pub fn try_new(config: OffloadConfig, bricks: Vec<Brick>) -> Result<Self, OffloadError> {
        config.validate()?;
        if config.workers == 0 || !crate::platform::threads_supported() {
            log::info!("No physics workers configured; stepping synchronously");
            return Ok(Self::synchronous(config, bricks));
        }

        let offload = match config.transport {
            TransportKind::SharedRing => Self::start_shared(config, bricks)?,
            TransportKind::MessagePassing => Self::start_message(config, bricks)?,
        };
        log::info!(
            "Physics offload ready: {:?} with {} worker(s), {} wait",
            offload.capability(),
            offload.workers.len(),
            offload.config.wait.as_str()
        );
        Ok(offload)
    }

    /// No workers at all
    pub fn synchronous(config: OffloadConfig, bricks: Vec<Brick>) -> Self {
        Self {
            wait: config.wait.resolve(),
            config,
            transport: Transport::Synchronous,
            bricks: BrickHistory::new(bricks),
            workers: Vec::new(),
        }
    }

    fn start_shared(config: OffloadConfig, bricks: Vec<Brick>) -> Result<Self, OffloadError> {
        let (ring, submitter) = SharedJobRing::initialize(config.ring_size, config.capacity)?;
        let settings = WorkerSettings {
            params: config.kernel,
            wait: config.wait.resolve(),
            idle_wait: config.idle_wait(),
        };
        let worker_count = config.workers;
        let mut offload = Self {
            wait: settings.wait,
            config,
            transport: Transport::Shared {
                ring: Arc::clone(&ring),
                submitter,
                controls: Vec::with_capacity(worker_count),
            },
            bricks: BrickHistory::new(bricks),
            workers: Vec::with_capacity(worker_count),
        };

        for id in 0..worker_count {
            let (tx, rx) = mpsc::channel();
            let stats = Arc::new(WorkerStats::default());
            let context = WorkerContext::new(id, Arc::clone(&ring), rx, settings, Arc::clone(&stats));
            // On error `offload` drops and shuts down the workers already started
            let join = std::thread::Builder::new()
                .name(format!("physics-worker-{id}"))
                .spawn(move || context.run())?;

            let init = WorkerMessage::Init {
                bricks: offload.bricks.current(),
                capacity: offload.config.capacity,
                ring_size: offload.config.ring_size,
            };
            // A fresh channel with a live receiver cannot be disconnected yet
            let _ = tx.send(init);
            if let Transport::Shared { controls, .. } = &mut offload.transport {
                controls.push(tx);
            }
            offload.workers.push(WorkerHandle {
                join: Some(join),
                stats,
            });
        }
        Ok(offload)
    }

    fn start_message(config: OffloadConfig, bricks: Vec<Brick>) -> Result<Self, OffloadError> {
        let (response_tx, response_rx) = mpsc::channel();
        let worker_count = config.workers;
        let params = config.kernel;
        let mut offload = Self {
            wait: config.wait.resolve(),
            config,
            transport: Transport::Message {
                inboxes: Vec::with_capacity(worker_count),
                responses: response_rx,
                in_flight: 0,
                next_job: 0,
            },
            bricks: BrickHistory::new(bricks),
            workers: Vec::with_capacity(worker_count),
        };

        for id in 0..worker_count {
            let (tx, rx) = mpsc::channel();
            let stats = Arc::new(WorkerStats::default());
            let worker = MessageWorker::new(id, rx, response_tx.clone(), params, Arc::clone(&stats));
            let join = std::thread::Builder::new()
                .name(format!("physics-worker-{id}"))
                .spawn(move || worker.run())?;

            let _ = tx.send(MessageEnvelope::Control(WorkerMessage::Init {
                bricks: offload.bricks.current(),
                capacity: offload.config.capacity,
                ring_size: offload.config.ring_size,
            }));
            if let Transport::Message { inboxes, .. } = &mut offload.transport {
                inboxes.push(tx);
            }
            offload.workers.push(WorkerHandle {
                join: Some(join),
                stats,
            });
        }
        Ok(offload)
    }

    pub fn capability(&self) -> OffloadCapability {
        match self.transport {
            Transport::Shared { .. } => OffloadCapability::Offloaded(TransportKind::SharedRing),
            Transport::Message { .. } => OffloadCapability::Offloaded(TransportKind::MessagePassing),
            Transport::Synchronous => OffloadCapability::Synchronous,
        }
    }

    pub fn config(&self) -> &OffloadConfig {
        &self.config
    }

    /// The latest brick snapshot
    pub fn bricks(&self) -> Arc<BrickSnapshot> {
        self.bricks.current()
    }

    /// Jobs submitted and not yet taken
    pub fn in_flight(&self) -> usize {
        match &self.transport {
            Transport::Shared { submitter, .. } => submitter.in_flight(),
            Transport::Message { in_flight, .. } => *in_flight,
            Transport::Synchronous => 0,
        }
    }

    pub fn stats(&self) -> Vec<WorkerStatsSnapshot> {
        self.workers
            .iter()
            .enumerate()
            .map(|(i, w)| w.stats.snapshot(i))
            .collect()
    }

    /// Submit the balls as one or more jobs if there is room for all of them.
    ///
    /// Returns false when nothing was submitted: no room (backpressure), no
    /// balls, or no workers. Callers then reuse the last positions or step
    /// synchronously.
    pub fn submit_job_if_idle(&mut self, balls: &[Ball], delta: f32, arena: &ArenaBounds) -> bool {
        let balls = finite_balls(balls);
        if balls.is_empty() {
            return false;
        }
        let capacity = self.config.capacity;
        let ring_size = self.config.ring_size;
        let jobs = balls.len().div_ceil(capacity);

        match &mut self.transport {
            Transport::Shared { submitter, .. } => {
                if submitter.free_slots() < jobs {
                    log::debug!("Job ring full ({} in flight); skipping offload", submitter.in_flight());
                    return false;
                }
                balls
                    .chunks(capacity)
                    .all(|chunk| submitter.submit(chunk, delta, arena).is_some())
            }
            Transport::Message {
                inboxes,
                in_flight,
                next_job,
                ..
            } => {
                if *in_flight + jobs > ring_size {
                    log::debug!("{} message jobs in flight; skipping offload", in_flight);
                    return false;
                }
                for chunk in balls.chunks(capacity) {
                    let job_id = *next_job;
                    *next_job += 1;
                    let inbox = &inboxes[(job_id % inboxes.len() as u64) as usize];
                    if inbox.send(MessageEnvelope::Job(job_request(job_id, chunk, delta, arena))).is_err() {
                        log::warn!("Message worker for job {} is gone", job_id);
                        return false;
                    }
                    *in_flight += 1;
                }
                true
            }
            Transport::Synchronous => false,
        }
    }

    /// Non-blocking: the next finished job, in completion order
    pub fn take_result_if_ready(&mut self) -> Option<JobOutput> {
        match &mut self.transport {
            Transport::Shared { submitter, .. } => {
                let job = submitter.try_take_any()?;
                Some(self.finish_ring_job(job))
            }
            Transport::Message {
                responses,
                in_flight,
                ..
            } => match responses.try_recv() {
                Ok(response) => {
                    *in_flight = in_flight.saturating_sub(1);
                    Some(finish_message_job(response))
                }
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => {
                    log::warn!("All message workers are gone");
                    None
                }
            },
            Transport::Synchronous => None,
        }
    }

    /// Wait up to `timeout` for the next finished job
    pub fn wait_for_result(&mut self, timeout: Duration) -> Option<JobOutput> {
        let wait = self.wait;
        match &mut self.transport {
            Transport::Shared { submitter, .. } => {
                let job = submitter.wait_for_any(wait, timeout)?;
                Some(self.finish_ring_job(job))
            }
            Transport::Message {
                responses,
                in_flight,
                ..
            } => {
                if *in_flight == 0 {
                    return None;
                }
                match responses.recv_timeout(timeout) {
                    Ok(response) => {
                        *in_flight = in_flight.saturating_sub(1);
                        Some(finish_message_job(response))
                    }
                    Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
                }
            }
            Transport::Synchronous => None,
        }
    }

    fn finish_ring_job(&self, job: CompletedJob) -> JobOutput {
        if job.failed {
            log::debug!("Slot {} returned a no-op result", job.slot);
        }
        let mut output = job.output;
        output.hit_brick_ids = self.bricks.resolve(job.brick_generation, &output.hit_indices);
        output
    }

    /// Replace the brick snapshot on every worker
    pub fn update_bricks(&mut self, bricks: Vec<Brick>) {
        let snapshot = self.bricks.push(bricks);
        match &self.transport {
            Transport::Shared { ring, controls, .. } => {
                for control in controls {
                    let _ = control.send(WorkerMessage::UpdateBricks {
                        bricks: Arc::clone(&snapshot),
                    });
                }
                ring.wake_workers();
            }
            Transport::Message { inboxes, .. } => {
                for inbox in inboxes {
                    let _ = inbox.send(MessageEnvelope::Control(WorkerMessage::UpdateBricks {
                        bricks: Arc::clone(&snapshot),
                    }));
                }
            }
            Transport::Synchronous => {}
        }
    }

    /// Step on the calling thread against the current bricks
    pub fn step_synchronous(
        &self,
        balls: &[Ball],
        delta: f32,
        arena: &ArenaBounds,
        options: &ApplyOptions,
    ) -> ApplyOutcome {
        let ctx = StepContext::new(*arena, delta, self.config.kernel);
        step_balls(balls, &self.bricks.current().bricks, &ctx, options)
    }

    /// Stop and join every worker. Further submissions return false.
    pub fn shutdown(&mut self) {
        match std::mem::replace(&mut self.transport, Transport::Synchronous) {
            Transport::Shared { ring, controls, .. } => {
                for control in &controls {
                    let _ = control.send(WorkerMessage::Shutdown);
                }
                ring.wake_workers();
            }
            Transport::Message { inboxes, .. } => {
                for inbox in &inboxes {
                    let _ = inbox.send(MessageEnvelope::Control(WorkerMessage::Shutdown));
                }
            }
            Transport::Synchronous => {}
        }

        for (id, worker) in self.workers.iter_mut().enumerate() {
            if let Some(join) = worker.join.take()
                && join.join().is_err()
            {
                log::error!("Physics worker {} panicked outside a job", id);
            }
        }
    }
}

impl Drop for PhysicsOffload {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Non-finite balls never leave the main thread
fn finite_balls(balls: &[Ball]) -> Cow<'_, [Ball]> {
    if balls.iter().all(Ball::is_finite) {
        return Cow::Borrowed(balls);
    }
    let kept: Vec<Ball> = balls.iter().filter(|b| b.is_finite()).cloned().collect();
    log::warn!("Holding back {} non-finite ball(s) from offload", balls.len() - kept.len());
    Cow::Owned(kept)
}

fn job_request(job_id: u64, balls: &[Ball], delta: f32, arena: &ArenaBounds) -> JobRequest {
    JobRequest {
        job_id,
        ids: balls.iter().map(|b| b.id.clone()).collect(),
        positions: balls.iter().flat_map(|b| b.position.to_array()).collect(),
        velocities: balls.iter().flat_map(|b| b.velocity.to_array()).collect(),
        radii: balls.iter().map(|b| b.radius).collect(),
        damages: balls.iter().map(|b| b.damage).collect(),
        delta,
        arena: *arena,
    }
}

fn finish_message_job(response: JobResponse) -> JobOutput {
    if response.failed {
        log::debug!("Message job {} returned a no-op result", response.job_id);
    }
    JobOutput {
        count: response.ids.len(),
        positions: response.positions,
        velocities: response.velocities,
        hit_indices: response.hit_indices,
        ids: Some(response.ids),
        hit_brick_ids: response.hit_brick_ids,
    }
}
