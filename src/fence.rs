//! Synchronization fences exchanged with the composition core.
//!
//! A [`Fence`] is a shared, signal-once handle. Retire fences are produced
//! by commits; acquire and release fences travel with layer buffers.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

static NEXT_FENCE_ID: AtomicU64 = AtomicU64::new(1);

struct FenceState {
    id: u64,
    signaled: Mutex<bool>,
    cv: Condvar,
}

/// Cloneable handle to a signal-once fence.
#[derive(Clone)]
pub struct Fence {
    inner: Arc<FenceState>,
}

impl Fence {
    /// Create an unsignaled fence.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FenceState {
                id: NEXT_FENCE_ID.fetch_add(1, Ordering::Relaxed),
                signaled: Mutex::new(false),
                cv: Condvar::new(),
            }),
        }
    }

    /// Create a fence that is already signaled.
    pub fn signaled() -> Self {
        let fence = Self::new();
        fence.signal();
        fence
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Signal the fence and wake every waiter. Signaling twice is a no-op.
    pub fn signal(&self) {
        let mut signaled = self.inner.signaled.lock();
        if !*signaled {
            *signaled = true;
            self.inner.cv.notify_all();
        }
    }

    pub fn is_signaled(&self) -> bool {
        *self.inner.signaled.lock()
    }

    /// Wait up to `timeout` for the fence. Returns whether it signaled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut signaled = self.inner.signaled.lock();
        if *signaled {
            return true;
        }
        let _ = self
            .inner
            .cv
            .wait_while_for(&mut signaled, |s| !*s, timeout);
        *signaled
    }

    /// Whether two handles refer to the same fence.
    pub fn same_as(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("id", &self.inner.id)
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_times_out_when_unsignaled() {
        let fence = Fence::new();
        assert!(!fence.wait(Duration::from_millis(5)));
    }

    #[test]
    fn test_signal_from_other_thread() {
        let fence = Fence::new();
        let remote = fence.clone();
        let handle = thread::spawn(move || remote.signal());
        assert!(fence.wait(Duration::from_secs(2)));
        handle.join().unwrap();
        assert!(fence.same_as(&fence.clone()));
        assert!(!fence.same_as(&Fence::signaled()));
    }
}
