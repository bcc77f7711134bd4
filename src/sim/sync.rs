//! Synchronous fallback step
//!
//! Used when no worker is available or the ring is full. Runs the same kernel
//! on the calling thread and goes through the same reconciliation, so hit and
//! contact events look identical to the offloaded path.

use super::kernel::{StepContext, step_ball};
use super::reconcile::{ApplyOptions, ApplyOutcome, JobOutput, apply_result_to_balls};
use super::state::{Ball, Brick};
use crate::consts::NO_HIT;

/// Step every finite ball on the current thread
pub fn step_balls(
    balls: &[Ball],
    bricks: &[Brick],
    ctx: &StepContext,
    options: &ApplyOptions,
) -> ApplyOutcome {
    let mut output = JobOutput {
        ids: Some(Vec::with_capacity(balls.len())),
        ..Default::default()
    };

    for ball in balls.iter().filter(|b| b.is_finite()) {
        let step = step_ball(ball.position, ball.velocity, ball.radius, ctx, bricks);
        output.positions.extend_from_slice(&step.position.to_array());
        output.velocities.extend_from_slice(&step.velocity.to_array());
        output.hit_indices.push(
            step.hit
                .and_then(|i| i32::try_from(i).ok())
                .unwrap_or(NO_HIT),
        );
        output
            .hit_brick_ids
            .push(step.hit.and_then(|i| bricks.get(i)).map(|b| b.id.clone()));
        if let Some(ids) = output.ids.as_mut() {
            ids.push(ball.id.clone());
        }
    }
    output.count = output.hit_indices.len();

    apply_result_to_balls(balls, &output, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::kernel::KernelParams;
    use crate::sim::state::{ArenaBounds, BrickKind};
    use glam::Vec3;

    #[test]
    fn test_sync_step_matches_kernel() {
        let bricks = vec![Brick::new("b0", BrickKind::Cube, Vec3::new(2.0, 0.0, 0.0), 1.0)];
        let balls = vec![
            Ball::new("hit", Vec3::new(0.6, 0.0, 0.0), Vec3::X),
            Ball::new("miss", Vec3::ZERO, Vec3::Y),
        ];
        let ctx = StepContext::new(ArenaBounds::new(10.0, 10.0, 10.0), 1.0, KernelParams::unclamped());

        let out = step_balls(&balls, &bricks, &ctx, &ApplyOptions::default());
        assert_eq!(out.balls[0].velocity, Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(out.balls[1].position, Vec3::Y);
        assert_eq!(out.hits.len(), 1);
        assert_eq!(out.hits[0].brick_id.as_deref(), Some("b0"));
        assert_eq!(out.hits[0].ball_id, "hit");
    }

    #[test]
    fn test_non_finite_ball_is_left_alone() {
        let mut broken = Ball::new("broken", Vec3::ZERO, Vec3::X);
        broken.position.x = f32::INFINITY;
        let balls = vec![broken.clone(), Ball::new("ok", Vec3::ZERO, Vec3::X)];
        let ctx = StepContext::new(ArenaBounds::default(), 0.5, KernelParams::unclamped());

        let out = step_balls(&balls, &[], &ctx, &ApplyOptions::default());
        assert!(out.rejected.is_none());
        assert_eq!(out.balls[0], broken);
        assert_eq!(out.balls[1].position, Vec3::new(0.5, 0.0, 0.0));
    }
}
