//! Batch simulation step
//!
//! Runs the kernel over parallel flat arrays and writes results back into the
//! same buffers. No allocation on the shared-memory path.

use glam::Vec3;

use super::kernel::{StepContext, step_ball};
use super::state::Brick;
use crate::consts::NO_HIT;
use crate::error::BatchError;

/// Parallel per-ball buffers for one batch
///
/// `positions`/`velocities` hold xyz triplets. Positions, velocities and hits
/// are overwritten in place.
#[derive(Debug)]
pub struct BatchBuffers<'a> {
    pub positions: &'a mut [f32],
    pub velocities: &'a mut [f32],
    pub radii: &'a [f32],
    pub damages: &'a [f32],
    pub hits: &'a mut [i32],
}

impl BatchBuffers<'_> {
    /// Check every buffer can hold `count` rows before anything is indexed
    pub fn validate(&self, count: usize) -> Result<(), BatchError> {
        let triplets = count * 3;
        check_len("positions", triplets, self.positions.len())?;
        check_len("velocities", triplets, self.velocities.len())?;
        check_len("radii", count, self.radii.len())?;
        check_len("damages", count, self.damages.len())?;
        check_len("hits", count, self.hits.len())?;
        Ok(())
    }
}

fn check_len(buffer: &'static str, needed: usize, actual: usize) -> Result<(), BatchError> {
    if actual < needed {
        return Err(BatchError::BufferTooShort {
            buffer,
            needed,
            actual,
        });
    }
    Ok(())
}

/// What a batch produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub balls: usize,
    pub hits: usize,
}

/// Apply the kernel to the first `count` rows, in place
///
/// Hit output is an index into `bricks` or [`NO_HIT`].
pub fn simulate_batch(
    count: usize,
    buffers: &mut BatchBuffers<'_>,
    ctx: &StepContext,
    bricks: &[Brick],
) -> Result<BatchSummary, BatchError> {
    buffers.validate(count)?;

    let positions: &mut [Vec3] = bytemuck::try_cast_slice_mut(&mut buffers.positions[..count * 3])
        .map_err(|_| BatchError::Misaligned { buffer: "positions" })?;
    let velocities: &mut [Vec3] =
        bytemuck::try_cast_slice_mut(&mut buffers.velocities[..count * 3])
            .map_err(|_| BatchError::Misaligned { buffer: "velocities" })?;

    let mut summary = BatchSummary {
        balls: count,
        hits: 0,
    };

    for i in 0..count {
        let step = step_ball(positions[i], velocities[i], buffers.radii[i], ctx, bricks);
        positions[i] = step.position;
        velocities[i] = step.velocity;
        buffers.hits[i] = match step.hit {
            Some(index) => {
                summary.hits += 1;
                i32::try_from(index).unwrap_or(NO_HIT)
            }
            None => NO_HIT,
        };
    }

    Ok(summary)
}

/// Id-based variant for the message-passing path
///
/// Returns one entry per row: the id of the brick hit, if any.
pub fn simulate_batch_ids(
    count: usize,
    buffers: &mut BatchBuffers<'_>,
    ctx: &StepContext,
    bricks: &[Brick],
) -> Result<Vec<Option<String>>, BatchError> {
    simulate_batch(count, buffers, ctx, bricks)?;
    Ok(buffers.hits[..count]
        .iter()
        .map(|&hit| {
            usize::try_from(hit)
                .ok()
                .and_then(|i| bricks.get(i))
                .map(|b| b.id.clone())
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::kernel::KernelParams;
    use crate::sim::state::{ArenaBounds, BrickKind};

    struct Fixture {
        positions: Vec<f32>,
        velocities: Vec<f32>,
        radii: Vec<f32>,
        damages: Vec<f32>,
        hits: Vec<i32>,
    }

    impl Fixture {
        fn new(rows: &[([f32; 3], [f32; 3])]) -> Self {
            Self {
                positions: rows.iter().flat_map(|(p, _)| *p).collect(),
                velocities: rows.iter().flat_map(|(_, v)| *v).collect(),
                radii: vec![0.25; rows.len()],
                damages: vec![1.0; rows.len()],
                hits: vec![0; rows.len()],
            }
        }

        fn buffers(&mut self) -> BatchBuffers<'_> {
            BatchBuffers {
                positions: &mut self.positions,
                velocities: &mut self.velocities,
                radii: &self.radii,
                damages: &self.damages,
                hits: &mut self.hits,
            }
        }
    }

    fn ctx() -> StepContext {
        StepContext::new(ArenaBounds::new(8.0, 8.0, 8.0), 1.0, KernelParams::unclamped())
    }

    #[test]
    fn test_batch_writes_in_place() {
        let bricks = vec![Brick::new("b0", BrickKind::Cube, Vec3::new(2.0, 0.0, 0.0), 3.0)];
        let mut fx = Fixture::new(&[
            ([0.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.6, 0.0, 0.0], [1.0, 0.0, 0.0]),
        ]);
        let summary = simulate_batch(2, &mut fx.buffers(), &ctx(), &bricks).unwrap();

        assert_eq!(summary, BatchSummary { balls: 2, hits: 1 });
        assert_eq!(&fx.positions[..3], &[0.0, 1.0, 0.0]);
        assert_eq!(&fx.positions[3..], &[1.6, 0.0, 0.0]);
        assert_eq!(&fx.velocities[3..], &[-1.0, 0.0, 0.0]);
        assert_eq!(fx.hits, vec![NO_HIT, 0]);
    }

    #[test]
    fn test_short_buffer_is_rejected_before_indexing() {
        let mut fx = Fixture::new(&[([0.0; 3], [1.0, 0.0, 0.0])]);
        fx.radii.clear();
        let before = fx.positions.clone();

        let err = simulate_batch(1, &mut fx.buffers(), &ctx(), &[]).unwrap_err();
        assert_eq!(
            err,
            BatchError::BufferTooShort {
                buffer: "radii",
                needed: 1,
                actual: 0
            }
        );
        assert_eq!(fx.positions, before);
    }

    #[test]
    fn test_count_larger_than_positions() {
        let mut fx = Fixture::new(&[([0.0; 3], [0.0; 3])]);
        let err = simulate_batch(2, &mut fx.buffers(), &ctx(), &[]).unwrap_err();
        assert!(matches!(err, BatchError::BufferTooShort { buffer: "positions", .. }));
    }

    #[test]
    fn test_rows_past_count_untouched() {
        let mut fx = Fixture::new(&[
            ([0.0; 3], [1.0, 0.0, 0.0]),
            ([1.0, 1.0, 1.0], [1.0, 0.0, 0.0]),
        ]);
        fx.hits[1] = 42;
        simulate_batch(1, &mut fx.buffers(), &ctx(), &[]).unwrap();
        assert_eq!(&fx.positions[3..], &[1.0, 1.0, 1.0]);
        assert_eq!(fx.hits[1], 42);
    }

    #[test]
    fn test_id_variant_reports_brick_ids() {
        let bricks = vec![
            Brick::new("left", BrickKind::Cube, Vec3::new(-2.0, 0.0, 0.0), 1.0),
            Brick::new("right", BrickKind::Cube, Vec3::new(2.0, 0.0, 0.0), 1.0),
        ];
        let mut fx = Fixture::new(&[
            ([0.6, 0.0, 0.0], [1.0, 0.0, 0.0]),
            ([0.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ]);
        let ids = simulate_batch_ids(2, &mut fx.buffers(), &ctx(), &bricks).unwrap();
        assert_eq!(ids, vec![Some("right".to_string()), None]);
    }
}
