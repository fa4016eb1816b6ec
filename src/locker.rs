//! Exclusive-access lockers with an attached condition variable.
//!
//! A [`Locker`] is the unit of serialization in the session: every display
//! slot owns two of them (power state and operation), and a handful of
//! global lockers guard cross-display bookkeeping. Waiting is always
//! bounded; callers pick the interval and the number of retries.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

pub struct Locker<T> {
    state: Mutex<T>,
    cv: Condvar,
}

/// Outcome of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, WaitOutcome::Satisfied)
    }
}

impl<T> Locker<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            cv: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock()
    }

    pub fn notify_all(&self) {
        self.cv.notify_all();
    }

    /// Wait on an already held guard until `ready` holds, for at most
    /// `timeout`.
    pub fn wait_until(
        &self,
        guard: &mut MutexGuard<'_, T>,
        timeout: Duration,
        mut ready: impl FnMut(&mut T) -> bool,
    ) -> WaitOutcome {
        if ready(&mut **guard) {
            return WaitOutcome::Satisfied;
        }
        let result = self.cv.wait_while_for(guard, |s| !ready(s), timeout);
        if result.timed_out() && !ready(&mut **guard) {
            WaitOutcome::TimedOut
        } else {
            WaitOutcome::Satisfied
        }
    }

    /// Wait in `retries` rounds of `interval` each. Lets a caller log or
    /// re-evaluate between rounds without holding a single long wait.
    pub fn wait_with_retry(
        &self,
        guard: &mut MutexGuard<'_, T>,
        interval: Duration,
        retries: u32,
        mut ready: impl FnMut(&mut T) -> bool,
    ) -> WaitOutcome {
        for _ in 0..retries.max(1) {
            if self.wait_until(guard, interval, &mut ready).is_satisfied() {
                return WaitOutcome::Satisfied;
            }
        }
        WaitOutcome::TimedOut
    }

    /// Mutate under the lock and wake every waiter.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.state.lock();
        let result = f(&mut guard);
        self.cv.notify_all();
        result
    }
}

impl<T: Default> Default for Locker<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_times_out() {
        let locker = Locker::new(false);
        let mut guard = locker.lock();
        let outcome = locker.wait_with_retry(&mut guard, Duration::from_millis(5), 2, |s| *s);
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn test_update_wakes_waiter() {
        let locker = Arc::new(Locker::new(0u32));
        let remote = Arc::clone(&locker);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            remote.update(|n| *n = 3);
        });
        let mut guard = locker.lock();
        let outcome = locker.wait_until(&mut guard, Duration::from_secs(2), |n| *n == 3);
        assert!(outcome.is_satisfied());
        drop(guard);
        handle.join().unwrap();
    }
}
