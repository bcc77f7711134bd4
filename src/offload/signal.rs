//! Wait/notify primitives for the job ring.
//!
//! Workers park on a shared notify counter (wait until the value changes).
//! The submitter parks on a per-slot completion signal. Where the runtime
//! cannot block a thread, waits degrade to a single cooperative yield.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// How a thread waits when it has nothing to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitStrategy {
    /// Park on a condition variable until notified or timed out
    Block,
    /// Yield once and return; the caller loops
    Yield,
}

impl WaitStrategy {
    /// Block where the platform can park threads, yield otherwise
    pub fn detect() -> Self {
        if crate::platform::blocking_wait_supported() {
            WaitStrategy::Block
        } else {
            WaitStrategy::Yield
        }
    }
}

/// Mutex + condvar pair; the mutex guards no data, only the check-then-wait
#[derive(Debug, Default)]
pub struct Signal {
    lock: Mutex<()>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake one waiter. Callers publish their state change before calling.
    pub fn notify_one(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_one();
    }

    pub fn notify_all(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// Wait until `ready()` holds or `timeout` elapses. Returns `ready()`.
    ///
    /// A timeout past the end of `Instant` waits without a deadline.
    pub fn wait_until(
        &self,
        ready: impl Fn() -> bool,
        strategy: WaitStrategy,
        timeout: Duration,
    ) -> bool {
        if ready() {
            return true;
        }
        let deadline = Instant::now().checked_add(timeout);
        match strategy {
            WaitStrategy::Block => {
                let mut guard = self.lock.lock();
                while !ready() {
                    match deadline {
                        Some(deadline) => {
                            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                                return ready();
                            }
                        }
                        None => self.cond.wait(&mut guard),
                    }
                }
                true
            }
            WaitStrategy::Yield => {
                while !ready() {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return false;
                    }
                    std::thread::yield_now();
                }
                true
            }
        }
    }
}

/// Monotonic counter workers wait on for "something changed"
#[derive(Debug, Default)]
pub struct NotifyCounter {
    value: AtomicU32,
    signal: Signal,
}

impl NotifyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn current(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Increment and wake every waiter. Returns the new value.
    pub fn bump(&self) -> u32 {
        let value = self.value.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        self.signal.notify_all();
        value
    }

    /// Wait until the counter differs from `observed`. Returns whether it did.
    ///
    /// Yield mode gives up the time slice once and returns, so an idle
    /// worker goes back to its control channel between polls.
    pub fn wait_for_change(&self, observed: u32, strategy: WaitStrategy, timeout: Duration) -> bool {
        match strategy {
            WaitStrategy::Block => {
                self.signal
                    .wait_until(|| self.current() != observed, strategy, timeout)
            }
            WaitStrategy::Yield => {
                std::thread::yield_now();
                self.current() != observed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn test_wait_returns_immediately_when_changed() {
        let counter = NotifyCounter::new();
        let observed = counter.current();
        counter.bump();
        assert!(counter.wait_for_change(observed, WaitStrategy::Block, Duration::from_secs(5)));
    }

    #[test]
    fn test_wait_times_out_without_bump() {
        let counter = NotifyCounter::new();
        let observed = counter.current();
        assert!(!counter.wait_for_change(observed, WaitStrategy::Block, Duration::from_millis(10)));
        assert!(!counter.wait_for_change(observed, WaitStrategy::Yield, Duration::from_secs(5)));
    }

    #[test]
    fn test_unbounded_timeout_waits_for_ready() {
        let signal = Arc::new(Signal::new());
        let flag = Arc::new(AtomicBool::new(false));
        let setter = {
            let signal = Arc::clone(&signal);
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                flag.store(true, Ordering::Release);
                signal.notify_all();
            })
        };
        assert!(signal.wait_until(|| flag.load(Ordering::Acquire), WaitStrategy::Block, Duration::MAX));
        setter.join().unwrap();
    }

    #[test]
    fn test_yield_wait_honors_timeout() {
        let signal = Signal::new();
        let flag = Arc::new(AtomicBool::new(false));
        let setter = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                flag.store(true, Ordering::Release);
            })
        };
        let ready = || flag.load(Ordering::Acquire);
        assert!(signal.wait_until(ready, WaitStrategy::Yield, Duration::from_secs(10)));
        setter.join().unwrap();

        let started = Instant::now();
        assert!(!signal.wait_until(|| false, WaitStrategy::Yield, Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(signal.wait_until(|| true, WaitStrategy::Yield, Duration::MAX));
    }

    #[test]
    fn test_bump_wakes_blocked_waiter() {
        let counter = Arc::new(NotifyCounter::new());
        let observed = counter.current();
        let waiter = {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                counter.wait_for_change(observed, WaitStrategy::Block, Duration::from_secs(10))
            })
        };
        thread::sleep(Duration::from_millis(20));
        counter.bump();
        assert!(waiter.join().unwrap());
    }
}
