//! Control-plane messages between the submitting side and workers.
//!
//! Ring workers receive only control messages; ball data travels through the
//! shared ring. Message-passing workers also receive owned job requests and
//! answer with owned responses (the portability fallback).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::sim::{ArenaBounds, BrickSnapshot};

#[derive(Debug, Clone)]
pub enum WorkerMessage {
    /// One-time setup: the initial brick snapshot and the expected geometry
    Init {
        bricks: Arc<BrickSnapshot>,
        capacity: usize,
        ring_size: usize,
    },
    /// Replace the brick snapshot without touching any job
    UpdateBricks { bricks: Arc<BrickSnapshot> },
    /// Leave the worker loop
    Shutdown,
}

/// A job for the message-passing transport (owned copy of the batch)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: u64,
    pub ids: Vec<String>,
    pub positions: Vec<f32>,
    pub velocities: Vec<f32>,
    pub radii: Vec<f32>,
    pub damages: Vec<f32>,
    pub delta: f32,
    pub arena: ArenaBounds,
}

impl JobRequest {
    pub fn count(&self) -> usize {
        self.ids.len()
    }
}

/// The answer to a [`JobRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResponse {
    pub job_id: u64,
    pub ids: Vec<String>,
    pub positions: Vec<f32>,
    pub velocities: Vec<f32>,
    pub hit_indices: Vec<i32>,
    pub hit_brick_ids: Vec<Option<String>>,
    pub brick_generation: u32,
    pub failed: bool,
}

impl JobResponse {
    /// Empty, failed response: the submitter keeps last known-good state
    pub fn failed(job_id: u64, brick_generation: u32) -> Self {
        Self {
            job_id,
            ids: Vec::new(),
            positions: Vec::new(),
            velocities: Vec::new(),
            hit_indices: Vec::new(),
            hit_brick_ids: Vec::new(),
            brick_generation,
            failed: true,
        }
    }
}

/// Everything a message-passing worker can receive
#[derive(Debug, Clone)]
pub enum MessageEnvelope {
    Control(WorkerMessage),
    Job(JobRequest),
}
