//! Idle Bricks headless demo
//!
//! Spawns a brick wall and a handful of balls, then runs a fixed number of
//! frames through the physics offload, reconciling results and chipping
//! bricks as they are hit.
//!
//! Usage: `idle-bricks [config.json]`

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    idle_bricks::platform::init_logging();
    log::info!("Idle Bricks (headless) starting...");

    let config = match std::env::args().nth(1) {
        Some(path) => match demo::load_config(&path) {
            Ok(config) => config,
            Err(err) => {
                log::error!("Could not load config {}: {}", path, err);
                std::process::exit(1);
            }
        },
        None => idle_bricks::OffloadConfig::default(),
    };

    demo::run(config);
}

#[cfg(target_arch = "wasm32")]
fn main() {
    // The browser host drives the library directly
}

#[cfg(not(target_arch = "wasm32"))]
mod demo {
    use std::time::Duration;

    use glam::Vec3;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg32;

    use idle_bricks::consts::*;
    use idle_bricks::sim::{ApplyOptions, ApplyOutcome, ArenaBounds, Ball, BallColor, Brick, BrickKind};
    use idle_bricks::{ConfigError, OffloadCapability, OffloadConfig, PhysicsOffload};

    const FRAMES: u32 = 600;
    const FRAME_DELTA: f32 = 1.0 / 60.0;
    const BALL_COUNT: usize = 24;
    const SEED: u64 = 0x1d1e_b41c;

    pub fn load_config(path: &str) -> Result<OffloadConfig, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("{path}: {e}")))?;
        OffloadConfig::from_json(&json)
    }

    /// A 5x3 wall of mixed bricks across the back of the arena
    fn brick_wall() -> Vec<Brick> {
        let kinds = [BrickKind::Standard, BrickKind::Wide, BrickKind::Cube];
        let mut bricks = Vec::new();
        for row in 0..3 {
            for col in 0..5 {
                let kind = kinds[(row + col) % kinds.len()];
                let position = Vec3::new(-6.0 + col as f32 * 3.0, 2.0 + row as f32 * 1.5, 0.0);
                bricks.push(Brick::new(format!("brick-{row}-{col}"), kind, position, 5.0));
            }
        }
        bricks
    }

    fn spawn_balls(rng: &mut Pcg32) -> Vec<Ball> {
        (0..BALL_COUNT)
            .map(|i| {
                let position = Vec3::new(
                    rng.random_range(-8.0..8.0),
                    rng.random_range(-5.0..-1.0),
                    rng.random_range(-3.0..3.0),
                );
                let velocity = Vec3::new(
                    rng.random_range(-0.2..0.2),
                    rng.random_range(0.05..0.2),
                    rng.random_range(-0.1..0.1),
                );
                let mut ball = Ball::new(format!("ball-{i}"), position, velocity).with_damage(BALL_DAMAGE);
                ball.color = BallColor(rng.random());
                ball
            })
            .collect()
    }

    #[derive(Default)]
    struct Tally {
        hits: usize,
        crits: usize,
        destroyed: usize,
        offloaded_frames: u32,
        sync_frames: u32,
        skipped_frames: u32,
    }

    /// Chip bricks by the reported hits. Returns the surviving wall if any
    /// brick broke.
    fn apply_hits(bricks: &[Brick], outcome: &ApplyOutcome, tally: &mut Tally) -> Option<Vec<Brick>> {
        if outcome.hits.is_empty() {
            return None;
        }
        let mut bricks = bricks.to_vec();
        for hit in &outcome.hits {
            tally.hits += 1;
            if hit.critical {
                tally.crits += 1;
            }
            let Some(id) = hit.brick_id.as_deref() else {
                continue;
            };
            if let Some(brick) = bricks.iter_mut().find(|b| b.id == id) {
                brick.health -= hit.damage;
            }
        }
        let before = bricks.len();
        bricks.retain(|b| b.health > 0.0);
        let broken = before - bricks.len();
        if broken == 0 {
            return None;
        }
        tally.destroyed += broken;
        log::info!("{} brick(s) destroyed, {} left", broken, bricks.len());
        Some(bricks)
    }

    pub fn run(config: OffloadConfig) {
        let arena = ArenaBounds::default();
        let mut rng = Pcg32::seed_from_u64(SEED);
        let mut balls = spawn_balls(&mut rng);
        let mut offload = PhysicsOffload::new(config, brick_wall());
        log::info!("Offload capability: {:?}", offload.capability());

        let mut tally = Tally::default();
        for frame in 0..FRAMES {
            let options = ApplyOptions {
                crit_chance: 0.1,
                crit_multiplier: CRIT_MULTIPLIER,
                seed: SEED ^ u64::from(frame),
            };

            let mut outcomes = Vec::new();
            while let Some(result) = offload.take_result_if_ready() {
                let outcome = idle_bricks::sim::apply_result_to_balls(&balls, &result, &options);
                balls = outcome.balls.clone();
                outcomes.push(outcome);
            }

            if offload.capability() == OffloadCapability::Synchronous {
                let outcome = offload.step_synchronous(&balls, FRAME_DELTA, &arena, &options);
                balls = outcome.balls.clone();
                outcomes.push(outcome);
                tally.sync_frames += 1;
            } else if offload.submit_job_if_idle(&balls, FRAME_DELTA, &arena) {
                tally.offloaded_frames += 1;
            } else {
                // Ring busy: keep last positions this frame
                tally.skipped_frames += 1;
            }

            for outcome in &outcomes {
                let current = offload.bricks();
                if let Some(survivors) = apply_hits(&current.bricks, outcome, &mut tally) {
                    offload.update_bricks(survivors);
                }
            }

            if offload.bricks().bricks.is_empty() {
                log::info!("Wall cleared on frame {}", frame);
                break;
            }
        }

        // Drain whatever is still in flight
        while offload.in_flight() > 0 {
            let Some(result) = offload.wait_for_result(Duration::from_secs(1)) else {
                break;
            };
            let outcome = idle_bricks::sim::apply_result_to_balls(&balls, &result, &ApplyOptions::default());
            balls = outcome.balls;
        }

        log::info!(
            "Frames: {} offloaded, {} synchronous, {} skipped",
            tally.offloaded_frames,
            tally.sync_frames,
            tally.skipped_frames
        );
        log::info!(
            "Hits: {} ({} critical), bricks destroyed: {}, balls: {}",
            tally.hits,
            tally.crits,
            tally.destroyed,
            balls.len()
        );
        for stats in offload.stats() {
            match serde_json::to_string(&stats) {
                Ok(json) => log::info!("Worker stats: {}", json),
                Err(err) => log::warn!("Could not encode worker stats: {}", err),
            }
        }
        offload.shutdown();
    }
}
