//! Message-passing transport.
//!
//! The portability fallback for runtimes without shared memory: each job is
//! an owned copy sent over a channel, simulated with the id-based batch
//! variant and answered with an owned response. Job/result semantics match
//! the shared ring, including "always answer, even on failure".

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};

use super::protocol::{JobRequest, JobResponse, MessageEnvelope, WorkerMessage};
use super::worker::WorkerStats;
use crate::sim::{
    BatchBuffers, BatchSummary, BrickSnapshot, KernelParams, StepContext, simulate_batch_ids,
};

pub struct MessageWorker {
    id: usize,
    inbox: Receiver<MessageEnvelope>,
    outbox: Sender<JobResponse>,
    bricks: Arc<BrickSnapshot>,
    params: KernelParams,
    stats: Arc<WorkerStats>,
    #[cfg(test)]
    fail_next_job: bool,
}

impl MessageWorker {
    pub fn new(
        id: usize,
        inbox: Receiver<MessageEnvelope>,
        outbox: Sender<JobResponse>,
        params: KernelParams,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            id,
            inbox,
            outbox,
            bricks: Arc::new(BrickSnapshot::default()),
            params,
            stats,
            #[cfg(test)]
            fail_next_job: false,
        }
    }

    /// Handle messages until `Shutdown` or the sender goes away
    pub fn run(mut self) {
        log::info!("Message worker {} started", self.id);
        while let Ok(envelope) = self.inbox.recv() {
            match envelope {
                MessageEnvelope::Control(WorkerMessage::Init { bricks, .. })
                | MessageEnvelope::Control(WorkerMessage::UpdateBricks { bricks }) => {
                    self.bricks = bricks;
                }
                MessageEnvelope::Control(WorkerMessage::Shutdown) => break,
                MessageEnvelope::Job(request) => {
                    let response = self.process(request);
                    if self.outbox.send(response).is_err() {
                        break;
                    }
                }
            }
        }
        log::info!("Message worker {} stopped", self.id);
    }

    fn process(&mut self, request: JobRequest) -> JobResponse {
        let job_id = request.job_id;
        let generation = self.bricks.generation;
        #[cfg(test)]
        let fail = std::mem::take(&mut self.fail_next_job);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            #[cfg(test)]
            if fail {
                panic!("kernel fault in job {job_id}");
            }
            run_job(request, &self.bricks, self.params)
        }));

        match outcome {
            Ok(Ok((mut response, summary))) => {
                response.brick_generation = generation;
                self.stats.record_success(&summary);
                response
            }
            Ok(Err(err)) => {
                log::warn!("Message worker {} job {}: {}", self.id, job_id, err);
                self.stats.record_failure();
                JobResponse::failed(job_id, generation)
            }
            Err(_) => {
                log::error!("Message worker {} job {}: kernel panicked", self.id, job_id);
                self.stats.record_failure();
                JobResponse::failed(job_id, generation)
            }
        }
    }
}

/// Simulate one owned request into its response
pub fn run_job(
    request: JobRequest,
    bricks: &BrickSnapshot,
    params: KernelParams,
) -> Result<(JobResponse, BatchSummary), crate::error::BatchError> {
    let JobRequest {
        job_id,
        ids,
        mut positions,
        mut velocities,
        radii,
        damages,
        delta,
        arena,
    } = request;
    let count = ids.len();
    let mut hit_indices = vec![0; count];
    let ctx = StepContext::new(arena, delta, params);

    let hit_brick_ids = simulate_batch_ids(
        count,
        &mut BatchBuffers {
            positions: &mut positions,
            velocities: &mut velocities,
            radii: &radii,
            damages: &damages,
            hits: &mut hit_indices,
        },
        &ctx,
        &bricks.bricks,
    )?;
    positions.truncate(count * 3);
    velocities.truncate(count * 3);

    let summary = BatchSummary {
        balls: count,
        hits: hit_brick_ids.iter().filter(|h| h.is_some()).count(),
    };
    let response = JobResponse {
        job_id,
        ids,
        positions,
        velocities,
        hit_indices,
        hit_brick_ids,
        brick_generation: bricks.generation,
        failed: false,
    };
    Ok((response, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ArenaBounds, Brick, BrickKind};
    use glam::Vec3;
    use std::sync::mpsc;

    fn request(job_id: u64) -> JobRequest {
        JobRequest {
            job_id,
            ids: vec!["a".into(), "b".into()],
            positions: vec![0.6, 0.0, 0.0, 0.0, 0.0, 0.0],
            velocities: vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            radii: vec![0.25, 0.25],
            damages: vec![1.0, 1.0],
            delta: 1.0,
            arena: ArenaBounds::new(10.0, 10.0, 10.0),
        }
    }

    fn snapshot() -> BrickSnapshot {
        BrickSnapshot::new(
            2,
            vec![Brick::new("target", BrickKind::Cube, Vec3::new(2.0, 0.0, 0.0), 1.0)],
        )
    }

    #[test]
    fn test_run_job_reports_ids() {
        let (response, summary) = run_job(request(1), &snapshot(), KernelParams::unclamped()).unwrap();
        assert_eq!(response.hit_brick_ids, vec![Some("target".to_string()), None]);
        assert_eq!(response.hit_indices, vec![0, -1]);
        assert_eq!(response.velocities[0], -1.0);
        assert_eq!(response.brick_generation, 2);
        assert_eq!(summary.hits, 1);
    }

    #[test]
    fn test_kernel_panic_gets_failed_response() {
        let (_in_tx, in_rx) = mpsc::channel();
        let (out_tx, _out_rx) = mpsc::channel();
        let stats = Arc::new(WorkerStats::default());
        let mut worker = MessageWorker::new(0, in_rx, out_tx, KernelParams::unclamped(), Arc::clone(&stats));
        worker.bricks = Arc::new(snapshot());

        worker.fail_next_job = true;
        let response = worker.process(request(4));
        assert!(response.failed);
        assert_eq!(response.job_id, 4);
        assert_eq!(response.brick_generation, 2);

        let response = worker.process(request(5));
        assert!(!response.failed);
        assert_eq!(response.ids.len(), 2);

        let snapshot = stats.snapshot(0);
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.jobs_completed, 1);
    }

    #[test]
    fn test_malformed_request_gets_failed_response() {
        let (in_tx, in_rx) = mpsc::channel();
        let (out_tx, out_rx) = mpsc::channel();
        let stats = Arc::new(WorkerStats::default());
        let worker = MessageWorker::new(0, in_rx, out_tx, KernelParams::unclamped(), Arc::clone(&stats));
        let handle = std::thread::spawn(move || worker.run());

        let mut bad = request(9);
        bad.radii.clear();
        in_tx.send(MessageEnvelope::Job(bad)).unwrap();
        let response = out_rx.recv().unwrap();
        assert!(response.failed);
        assert_eq!(response.job_id, 9);
        assert!(response.positions.is_empty());

        in_tx
            .send(MessageEnvelope::Control(WorkerMessage::Shutdown))
            .unwrap();
        handle.join().unwrap();
        assert_eq!(stats.snapshot(0).jobs_failed, 1);
    }
}
