//! Ball, brick and arena types
//!
//! Balls are owned by the main-thread game state. Bricks reach the core only
//! as read-only snapshots.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::consts::*;

/// Display color, opaque to the physics core (packed RGBA)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BallColor(pub u32);

/// A ball entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    /// Stable identifier, used to re-associate worker output with live balls
    pub id: String,
    pub position: Vec3,
    pub velocity: Vec3,
    pub radius: f32,
    /// Damage dealt per brick hit (raised by upgrades)
    pub damage: f32,
    #[serde(default)]
    pub color: BallColor,
}

impl Ball {
    pub fn new(id: impl Into<String>, position: Vec3, velocity: Vec3) -> Self {
        Self {
            id: id.into(),
            position,
            velocity,
            radius: BALL_RADIUS,
            damage: BALL_DAMAGE,
            color: BallColor::default(),
        }
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_damage(mut self, damage: f32) -> Self {
        self.damage = damage;
        self
    }

    /// Whether every physics field is finite (safe to hand to the kernel)
    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.radius.is_finite()
            && self.damage.is_finite()
    }
}

/// Brick types; each has fixed box half-extents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BrickKind {
    #[default]
    Standard,
    Wide,
    Cube,
}

impl BrickKind {
    pub fn half_extents(&self) -> Vec3 {
        match self {
            BrickKind::Standard => STANDARD_BRICK_HALF_EXTENTS,
            BrickKind::Wide => WIDE_BRICK_HALF_EXTENTS,
            BrickKind::Cube => CUBE_BRICK_HALF_EXTENTS,
        }
    }
}

/// A destructible brick (read-only from the core's perspective)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brick {
    pub id: String,
    #[serde(default)]
    pub kind: BrickKind,
    pub position: Vec3,
    /// Remaining health. The core only reports hits, it never subtracts.
    pub health: f32,
}

impl Brick {
    pub fn new(id: impl Into<String>, kind: BrickKind, position: Vec3, health: f32) -> Self {
        Self {
            id: id.into(),
            kind,
            position,
            health,
        }
    }

    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        self.kind.half_extents()
    }

    /// Closest point on the brick's box to `point`
    #[inline]
    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        let half = self.half_extents();
        point.clamp(self.position - half, self.position + half)
    }
}

/// A versioned brick snapshot shared with workers
///
/// Hit indices produced by a worker are only meaningful against the snapshot
/// generation that worker used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrickSnapshot {
    pub generation: u32,
    pub bricks: Vec<Brick>,
}

impl BrickSnapshot {
    pub fn new(generation: u32, bricks: Vec<Brick>) -> Self {
        Self { generation, bricks }
    }

    /// Brick id for a hit index, `None` for the sentinel or out-of-range indices
    pub fn brick_id(&self, hit_index: i32) -> Option<&str> {
        usize::try_from(hit_index)
            .ok()
            .and_then(|i| self.bricks.get(i))
            .map(|b| b.id.as_str())
    }
}

/// Centered axis-aligned arena balls must stay inside
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArenaBounds {
    pub width: f32,
    pub height: f32,
    pub depth: f32,
}

impl Default for ArenaBounds {
    fn default() -> Self {
        Self {
            width: 20.0,
            height: 12.0,
            depth: 8.0,
        }
    }
}

impl ArenaBounds {
    pub fn new(width: f32, height: f32, depth: f32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        Vec3::new(self.width, self.height, self.depth) * 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brick_closest_point() {
        let brick = Brick::new("b", BrickKind::Standard, Vec3::new(0.0, 2.0, 0.0), 10.0);
        let closest = brick.closest_point(Vec3::new(5.0, 2.0, 0.0));
        assert_eq!(closest, Vec3::new(1.0, 2.0, 0.0));

        // Points inside the box map to themselves
        let inside = Vec3::new(0.5, 2.1, -0.2);
        assert_eq!(brick.closest_point(inside), inside);
    }

    #[test]
    fn test_snapshot_brick_id() {
        let snapshot = BrickSnapshot::new(
            3,
            vec![
                Brick::new("a", BrickKind::Cube, Vec3::ZERO, 1.0),
                Brick::new("b", BrickKind::Wide, Vec3::X, 1.0),
            ],
        );
        assert_eq!(snapshot.brick_id(1), Some("b"));
        assert_eq!(snapshot.brick_id(NO_HIT), None);
        assert_eq!(snapshot.brick_id(7), None);
    }

    #[test]
    fn test_arena_half_extents() {
        let arena = ArenaBounds::new(8.0, 4.0, 2.0);
        assert_eq!(arena.half_extents(), Vec3::new(4.0, 2.0, 1.0));
    }

    #[test]
    fn test_ball_is_finite() {
        let mut ball = Ball::new("x", Vec3::ZERO, Vec3::X);
        assert!(ball.is_finite());
        ball.velocity.y = f32::NAN;
        assert!(!ball.is_finite());
    }
}
