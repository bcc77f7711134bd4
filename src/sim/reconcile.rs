//! Result reconciliation
//!
//! Merges a completed job back into the live ball list. The list may have
//! changed while the job was in flight, so rows are matched by ball id. A
//! malformed result is never partially applied.

use std::collections::HashMap;

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use super::state::Ball;
use crate::consts::{CRIT_MULTIPLIER, NO_HIT};
use crate::error::ResultRejected;
use crate::first_non_finite;

/// A completed job as seen by the main thread
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    /// xyz triplets, one per row
    pub positions: Vec<f32>,
    pub velocities: Vec<f32>,
    /// Brick index per row, or [`NO_HIT`]
    pub hit_indices: Vec<i32>,
    pub count: usize,
    /// Ball ids in row order. `None` means rows map to live balls by position.
    pub ids: Option<Vec<String>>,
    /// Brick id per row, resolved against the snapshot the worker used
    pub hit_brick_ids: Vec<Option<String>>,
}

impl JobOutput {
    /// Number of xyz rows actually present
    pub fn rows(&self) -> usize {
        self.positions.len() / 3
    }

    fn hit_for_row(&self, row: usize) -> Option<&str> {
        if let Some(Some(id)) = self.hit_brick_ids.get(row) {
            return Some(id.as_str());
        }
        None
    }

    fn row_was_hit(&self, row: usize) -> bool {
        self.hit_for_row(row).is_some()
            || self.hit_indices.get(row).is_some_and(|&h| h != NO_HIT)
    }

    /// Shape and value checks; the whole result is rejected on any failure
    pub fn validate(&self) -> Result<(), ResultRejected> {
        if self.positions.len() != self.velocities.len() {
            return Err(ResultRejected::ShapeMismatch {
                positions: self.positions.len(),
                velocities: self.velocities.len(),
            });
        }
        if self.positions.len() % 3 != 0 {
            return Err(ResultRejected::NotTriplets {
                len: self.positions.len(),
            });
        }
        if let Some(index) = first_non_finite(&self.positions) {
            return Err(ResultRejected::NonFinite {
                buffer: "positions",
                index,
            });
        }
        if let Some(index) = first_non_finite(&self.velocities) {
            return Err(ResultRejected::NonFinite {
                buffer: "velocities",
                index,
            });
        }
        Ok(())
    }
}

/// Caller-supplied reconciliation options
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApplyOptions {
    /// Probability (0..=1) that a hit is critical
    pub crit_chance: f32,
    /// Damage multiplier applied to critical hits
    pub crit_multiplier: f32,
    /// Seed for the crit rolls, so the call stays deterministic
    pub seed: u64,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            crit_chance: 0.0,
            crit_multiplier: CRIT_MULTIPLIER,
            seed: 0,
        }
    }
}

/// Damage event forwarded to the scoring layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrickHit {
    pub brick_id: Option<String>,
    pub ball_id: String,
    /// Damage after critical amplification
    pub damage: f32,
    pub critical: bool,
    /// Ball velocity before this step's reflection
    pub ball_velocity: Vec3,
}

/// Contact record for effects and scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub ball_id: String,
    pub brick_id: Option<String>,
    pub point: Vec3,
    /// Approximate surface normal, opposite the incoming direction
    pub normal: Vec3,
    /// Momentum change for a unit-mass ball
    pub impulse: f32,
}

/// Everything reconciliation produces
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    pub balls: Vec<Ball>,
    pub hits: Vec<BrickHit>,
    pub contacts: Vec<ContactInfo>,
    /// Set when the whole result was discarded
    pub rejected: Option<ResultRejected>,
    /// Rows whose ball no longer exists
    pub stale_rows: usize,
}

impl ApplyOutcome {
    fn unchanged(live: &[Ball], rejected: Option<ResultRejected>) -> Self {
        Self {
            balls: live.to_vec(),
            rejected,
            ..Default::default()
        }
    }
}

/// Merge a completed job into the live ball list
///
/// Pure: returns a new ball list plus hit/contact events and leaves `live`
/// untouched.
///
/// Without an id list, row `i` is applied to `live[i]`. That mapping
/// silently misattributes rows if balls were reordered or removed while the
/// job ran; prefer id-carrying results.
pub fn apply_result_to_balls(
    live: &[Ball],
    result: &JobOutput,
    options: &ApplyOptions,
) -> ApplyOutcome {
    if let Err(rejected) = result.validate() {
        log::warn!("Discarding physics result: {}", rejected);
        return ApplyOutcome::unchanged(live, Some(rejected));
    }

    // Rows past the declared count are stale slot contents
    let rows = result.rows().min(result.count);
    let mut outcome = ApplyOutcome::unchanged(live, None);
    let mut crits = CritRoller::new(options);

    match &result.ids {
        Some(ids) => {
            let index_by_id: HashMap<&str, usize> = live
                .iter()
                .enumerate()
                .map(|(i, b)| (b.id.as_str(), i))
                .collect();

            for (row, id) in ids.iter().enumerate().take(rows) {
                let Some(&ball_index) = index_by_id.get(id.as_str()) else {
                    log::debug!("Ball {} removed while its job was in flight", id);
                    outcome.stale_rows += 1;
                    continue;
                };
                apply_row(&mut outcome, ball_index, row, result, &mut crits);
            }
        }
        None => {
            for row in 0..rows.min(live.len()) {
                apply_row(&mut outcome, row, row, result, &mut crits);
            }
        }
    }

    outcome
}

fn apply_row(
    outcome: &mut ApplyOutcome,
    ball_index: usize,
    row: usize,
    result: &JobOutput,
    crits: &mut CritRoller,
) {
    let base = row * 3;
    let position = Vec3::from_slice(&result.positions[base..base + 3]);
    let velocity = Vec3::from_slice(&result.velocities[base..base + 3]);

    let ball = &mut outcome.balls[ball_index];
    let before_velocity = ball.velocity;
    let before_damage = ball.damage;
    ball.position = position;
    ball.velocity = velocity;

    if !result.row_was_hit(row) {
        return;
    }

    let brick_id = result.hit_for_row(row).map(str::to_owned);
    let critical = crits.roll();
    let damage = if critical {
        before_damage * crits.multiplier
    } else {
        before_damage
    };

    let direction = before_velocity.normalize_or_zero();
    outcome.contacts.push(ContactInfo {
        ball_id: ball.id.clone(),
        brick_id: brick_id.clone(),
        point: position + direction * ball.radius,
        normal: -direction,
        impulse: (velocity - before_velocity).length(),
    });
    outcome.hits.push(BrickHit {
        brick_id,
        ball_id: ball.id.clone(),
        damage,
        critical,
        ball_velocity: before_velocity,
    });
}

/// Seeded crit rolls; no rolls are drawn when crits are disabled
struct CritRoller {
    rng: Pcg32,
    chance: f64,
    multiplier: f32,
}

impl CritRoller {
    fn new(options: &ApplyOptions) -> Self {
        let chance = if options.crit_chance.is_finite() {
            f64::from(options.crit_chance.clamp(0.0, 1.0))
        } else {
            0.0
        };
        Self {
            rng: Pcg32::seed_from_u64(options.seed),
            chance,
            multiplier: options.crit_multiplier,
        }
    }

    fn roll(&mut self) -> bool {
        self.chance > 0.0 && self.rng.random_bool(self.chance)
    }
}
