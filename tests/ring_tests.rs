use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use glam::Vec3;
use idle_bricks::offload::ring::SharedJobRing;
use idle_bricks::offload::signal::WaitStrategy;
use idle_bricks::offload::SlotState;
use idle_bricks::sim::{ArenaBounds, Ball, KernelParams, simulate_batch};

#[test]
fn test_ring_is_sync_and_send() {
    fn assert_sync_send<T: Sync + Send>() {}
    assert_sync_send::<SharedJobRing>();
}

/// Two claimers race for a single slot while the submitter refills it.
/// The `inside` guard trips if two parties ever own the slot at once.
#[test]
fn test_single_slot_has_one_owner_at_a_time() {
    const ROUNDS: usize = 500;

    let (ring, mut submitter) = SharedJobRing::initialize(1, 4).unwrap();
    let inside = Arc::new(AtomicBool::new(false));
    let stop = Arc::new(AtomicBool::new(false));
    let processed = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _ in 0..2 {
        let ring = Arc::clone(&ring);
        let inside = Arc::clone(&inside);
        let stop = Arc::clone(&stop);
        let processed = Arc::clone(&processed);
        handles.push(thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                let Some(mut claim) = ring.try_claim_any() else {
                    thread::yield_now();
                    continue;
                };
                assert!(!inside.swap(true, Ordering::AcqRel), "slot claimed twice");
                let count = claim.count().unwrap();
                let ctx = claim.step_context(KernelParams::unclamped());
                simulate_batch(count, &mut claim.buffers(), &ctx, &[]).unwrap();
                inside.store(false, Ordering::Release);
                processed.fetch_add(1, Ordering::Relaxed);
                claim.complete();
            }
        }));
    }

    let arena = ArenaBounds::new(100.0, 100.0, 100.0);
    for round in 0..ROUNDS {
        let x = round as f32 * 0.01;
        let balls = [Ball::new("a", Vec3::new(x, 0.0, 0.0), Vec3::Y)];
        assert!(!inside.load(Ordering::Acquire), "submitter wrote a claimed slot");
        let slot = submitter.submit(&balls, 1.0, &arena).expect("slot is free");
        // The only slot is busy until taken
        assert!(submitter.submit(&balls, 1.0, &arena).is_none());

        let job = submitter
            .wait_for_result(slot, WaitStrategy::Block, Duration::from_secs(10))
            .expect("claimer finished");
        assert_eq!(job.output.positions, vec![x, 1.0, 0.0]);
        assert_eq!(ring.slot_state(slot), Some(SlotState::Empty));
    }

    stop.store(true, Ordering::Release);
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(processed.load(Ordering::Relaxed), ROUNDS);
}

#[test]
fn test_many_slots_many_claimers() {
    const JOBS: usize = 200;

    let (ring, mut submitter) = SharedJobRing::initialize(4, 2).unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let mut handles = vec![];
    for _ in 0..3 {
        let ring = Arc::clone(&ring);
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                match ring.try_claim_any() {
                    Some(mut claim) => {
                        let count = claim.count().unwrap();
                        let ctx = claim.step_context(KernelParams::unclamped());
                        simulate_batch(count, &mut claim.buffers(), &ctx, &[]).unwrap();
                        claim.complete();
                    }
                    None => thread::yield_now(),
                }
            }
        }));
    }

    let arena = ArenaBounds::new(1000.0, 1000.0, 1000.0);
    let mut submitted = 0;
    let mut taken = 0;
    while taken < JOBS {
        if submitted < JOBS {
            let balls = [
                Ball::new(format!("{submitted}-a"), Vec3::ZERO, Vec3::X),
                Ball::new(format!("{submitted}-b"), Vec3::ZERO, Vec3::Z),
            ];
            if submitter.submit(&balls, 2.0, &arena).is_some() {
                submitted += 1;
            }
        }
        if let Some(job) = submitter.try_take_any() {
            assert!(!job.failed);
            assert_eq!(job.output.positions, vec![2.0, 0.0, 0.0, 0.0, 0.0, 2.0]);
            let ids = job.output.ids.unwrap();
            assert!(ids[0].ends_with("-a") && ids[1].ends_with("-b"));
            taken += 1;
        } else {
            thread::yield_now();
        }
    }

    stop.store(true, Ordering::Release);
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(submitter.in_flight(), 0);
}
