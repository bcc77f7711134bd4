//! Per-ball collision kernel
//!
//! Advances one ball by one step: linear integration, per-axis wall
//! reflection, then a single brick hit at most. Reflections are pure sign
//! flips with no energy loss.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::state::{ArenaBounds, Brick};
use crate::consts::*;

/// Integration parameters shared by every ball in a step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelParams {
    /// Upper bound on the frame delta (seconds)
    pub max_step_seconds: f32,
    /// Velocity units are per reference frame; this converts seconds to frames
    pub frame_scale: f32,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            max_step_seconds: MAX_STEP_SECONDS,
            frame_scale: FRAME_SCALE,
        }
    }
}

impl KernelParams {
    /// Raw deltas, velocity in units per second. For tests and tooling.
    pub fn unclamped() -> Self {
        Self {
            max_step_seconds: f32::INFINITY,
            frame_scale: 1.0,
        }
    }

    /// Clamped delta, in reference frames. Negative or non-finite deltas step by zero.
    #[inline]
    pub fn scaled_step(&self, delta: f32) -> f32 {
        if !delta.is_finite() || delta <= 0.0 {
            return 0.0;
        }
        delta.min(self.max_step_seconds) * self.frame_scale
    }
}

/// Everything a step needs besides the ball and the bricks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepContext {
    pub arena: ArenaBounds,
    pub delta: f32,
    pub params: KernelParams,
}

impl StepContext {
    pub fn new(arena: ArenaBounds, delta: f32, params: KernelParams) -> Self {
        Self {
            arena,
            delta,
            params,
        }
    }
}

/// Result of one kernel step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelStep {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Index into the brick slice of the brick that was hit, if any
    pub hit: Option<usize>,
}

/// Advance one ball by one step
pub fn step_ball(
    position: Vec3,
    velocity: Vec3,
    radius: f32,
    ctx: &StepContext,
    bricks: &[Brick],
) -> KernelStep {
    let dt = ctx.params.scaled_step(ctx.delta);
    let mut next = position + velocity * dt;
    let mut velocity = velocity;

    resolve_walls(&mut next, &mut velocity, radius, &ctx.arena);
    let hit = resolve_bricks(next, &mut velocity, radius, bricks);

    KernelStep {
        position: next,
        velocity,
        hit,
    }
}

/// Reflect and clamp each axis independently against the arena walls
pub fn resolve_walls(position: &mut Vec3, velocity: &mut Vec3, radius: f32, arena: &ArenaBounds) {
    let half = arena.half_extents();
    for axis in 0..3 {
        // A ball wider than the arena is pinned to the center on that axis
        let limit = (half[axis] - radius).max(0.0);
        if position[axis] > limit {
            position[axis] = limit;
            velocity[axis] = -velocity[axis];
        } else if position[axis] < -limit {
            position[axis] = -limit;
            velocity[axis] = -velocity[axis];
        }
    }
}

/// First penetrating brick wins; the rest are ignored this step.
///
/// The reflected axis is the one with the largest separation between the
/// ball center and the brick center.
pub fn resolve_bricks(
    position: Vec3,
    velocity: &mut Vec3,
    radius: f32,
    bricks: &[Brick],
) -> Option<usize> {
    let radius_sq = radius * radius;
    for (index, brick) in bricks.iter().enumerate() {
        let closest = brick.closest_point(position);
        if position.distance_squared(closest) >= radius_sq {
            continue;
        }

        let axis = dominant_axis(position - brick.position);
        velocity[axis] = -velocity[axis];
        return Some(index);
    }
    None
}

/// Axis with the largest absolute component (ties favor x, then y)
#[inline]
pub fn dominant_axis(v: Vec3) -> usize {
    let a = v.abs();
    if a.x >= a.y && a.x >= a.z {
        0
    } else if a.y >= a.z {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::state::BrickKind;
    use proptest::prelude::*;

    fn unclamped(arena: ArenaBounds, delta: f32) -> StepContext {
        StepContext::new(arena, delta, KernelParams::unclamped())
    }

    #[test]
    fn test_free_flight() {
        let ctx = unclamped(ArenaBounds::new(10.0, 10.0, 10.0), 0.5);
        let step = step_ball(Vec3::ZERO, Vec3::new(2.0, -1.0, 0.0), 0.25, &ctx, &[]);
        assert_eq!(step.position, Vec3::new(1.0, -0.5, 0.0));
        assert_eq!(step.velocity, Vec3::new(2.0, -1.0, 0.0));
        assert!(step.hit.is_none());
    }

    #[test]
    fn test_delta_is_clamped() {
        let params = KernelParams::default();
        assert_eq!(params.scaled_step(1.0), MAX_STEP_SECONDS * FRAME_SCALE);
        assert_eq!(params.scaled_step(0.025), 0.025 * FRAME_SCALE);
        assert_eq!(params.scaled_step(-0.1), 0.0);
        assert_eq!(params.scaled_step(f32::NAN), 0.0);
    }

    #[test]
    fn test_head_on_wall_reflection() {
        // Ball heading into +x wall rebounds with -v on x, y/z untouched
        let ctx = unclamped(ArenaBounds::new(8.0, 8.0, 8.0), 1.0);
        let v = Vec3::new(3.0, 0.5, -0.25);
        let step = step_ball(Vec3::new(3.0, 0.0, 0.0), v, 0.5, &ctx, &[]);
        assert_eq!(step.velocity, Vec3::new(-3.0, 0.5, -0.25));
        assert_eq!(step.position.x, 3.5);
    }

    #[test]
    fn test_corner_reflects_each_axis() {
        let ctx = unclamped(ArenaBounds::new(4.0, 4.0, 4.0), 1.0);
        let step = step_ball(Vec3::ZERO, Vec3::new(5.0, -5.0, 1.0), 0.5, &ctx, &[]);
        assert_eq!(step.velocity, Vec3::new(-5.0, 5.0, 1.0));
        assert_eq!(step.position, Vec3::new(1.5, -1.5, 1.0));
    }

    #[test]
    fn test_single_brick_hit_reflects_dominant_axis() {
        // Ball approaching a brick from +x side
        let brick = Brick::new("b0", BrickKind::Cube, Vec3::ZERO, 5.0);
        let ctx = unclamped(ArenaBounds::new(20.0, 20.0, 20.0), 1.0);
        let step = step_ball(
            Vec3::new(1.2, 0.1, 0.0),
            Vec3::new(-0.5, 0.2, 0.0),
            0.25,
            &ctx,
            &[brick],
        );
        assert_eq!(step.hit, Some(0));
        assert_eq!(step.velocity, Vec3::new(0.5, 0.2, 0.0));
    }

    #[test]
    fn test_first_penetrating_brick_wins() {
        // Three overlapping bricks; only index 1 and 2 penetrate, 1 comes first
        let bricks = vec![
            Brick::new("far", BrickKind::Cube, Vec3::new(5.0, 5.0, 0.0), 1.0),
            Brick::new("near", BrickKind::Standard, Vec3::new(0.0, 1.0, 0.0), 1.0),
            Brick::new("also", BrickKind::Cube, Vec3::new(0.2, 0.8, 0.0), 1.0),
        ];
        let ctx = unclamped(ArenaBounds::new(20.0, 20.0, 20.0), 1.0);
        let step = step_ball(Vec3::ZERO, Vec3::new(0.0, 0.3, 0.0), 0.3, &ctx, &bricks);
        assert_eq!(step.hit, Some(1));
        // Separation from "near" center is (0, -0.7, 0): y axis flips once
        assert_eq!(step.velocity, Vec3::new(0.0, -0.3, 0.0));
    }

    #[test]
    fn test_touching_is_not_penetrating() {
        let brick = Brick::new("b", BrickKind::Cube, Vec3::ZERO, 1.0);
        let ctx = unclamped(ArenaBounds::new(20.0, 20.0, 20.0), 0.0);
        let step = step_ball(Vec3::new(0.75, 0.0, 0.0), Vec3::X, 0.25, &ctx, &[brick]);
        assert!(step.hit.is_none());
    }

    #[test]
    fn test_dominant_axis() {
        assert_eq!(dominant_axis(Vec3::new(-3.0, 1.0, 2.0)), 0);
        assert_eq!(dominant_axis(Vec3::new(0.0, -2.0, 1.0)), 1);
        assert_eq!(dominant_axis(Vec3::new(0.1, 0.2, -0.3)), 2);
        assert_eq!(dominant_axis(Vec3::splat(1.0)), 0);
    }

    proptest! {
        #[test]
        fn prop_motion_stays_in_bounds(
            px in -10.0f32..10.0, py in -10.0f32..10.0, pz in -10.0f32..10.0,
            vx in -50.0f32..50.0, vy in -50.0f32..50.0, vz in -50.0f32..50.0,
            radius in 0.0f32..1.5,
            delta in 0.0f32..=MAX_STEP_SECONDS,
            w in 1.0f32..30.0, h in 1.0f32..30.0, d in 1.0f32..30.0,
        ) {
            let arena = ArenaBounds::new(w, h, d);
            let ctx = StepContext::new(arena, delta, KernelParams::default());
            let bricks = vec![Brick::new("b", BrickKind::Standard, Vec3::new(1.0, 0.0, 0.0), 1.0)];
            let step = step_ball(Vec3::new(px, py, pz), Vec3::new(vx, vy, vz), radius, &ctx, &bricks);
            let half = arena.half_extents();
            for axis in 0..3 {
                prop_assert!(step.position[axis].abs() <= half[axis]);
            }
        }

        #[test]
        fn prop_reflection_only_flips_signs(
            vx in -50.0f32..50.0, vy in -50.0f32..50.0, vz in -50.0f32..50.0,
            px in -6.0f32..6.0,
        ) {
            let ctx = StepContext::new(ArenaBounds::new(8.0, 8.0, 8.0), 1.0 / 30.0, KernelParams::default());
            let v = Vec3::new(vx, vy, vz);
            let step = step_ball(Vec3::new(px, 0.0, 0.0), v, 0.25, &ctx, &[]);
            prop_assert_eq!(step.velocity.abs(), v.abs());
        }
    }
}
