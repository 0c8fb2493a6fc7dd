use std::sync::Arc;
use std::time::Duration;

use log::warn;
use parking_lot::{Condvar, Mutex};

/// The implicit backend has no native semaphores; a counting wait primitive
/// emulates the dependency ordering the explicit backend gets from
/// `VkSemaphore`. Signals and waits happen CPU-side around submits; the
/// single wgpu queue already orders the GPU work itself.
#[derive(Clone, Default)]
pub struct CountingSemaphore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    count: Mutex<u32>,
    cv: Condvar,
}

/// Waits use "indefinitely" semantics; this bound only exists to turn a
/// dependency-cycle programming error into a loud warning instead of a hang.
const WAIT_SLICE: Duration = Duration::from_secs(5);

impl CountingSemaphore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut count = self.inner.count.lock();
        *count += 1;
        self.inner.cv.notify_one();
    }

    /// Block until the count is positive, then decrement.
    pub fn wait(&self) {
        let mut count = self.inner.count.lock();
        while *count == 0 {
            if self
                .inner
                .cv
                .wait_for(&mut count, WAIT_SLICE)
                .timed_out()
                && *count == 0
            {
                warn!("semaphore wait exceeded {WAIT_SLICE:?}; still waiting");
            }
        }
        *count -= 1;
    }

    /// Non-blocking variant: decrement if positive.
    pub fn try_wait(&self) -> bool {
        let mut count = self.inner.count.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_then_wait_does_not_block() {
        let sem = CountingSemaphore::new();
        sem.signal();
        sem.wait();
        assert!(!sem.try_wait());
    }

    #[test]
    fn counts_accumulate() {
        let sem = CountingSemaphore::new();
        sem.signal();
        sem.signal();
        assert!(sem.try_wait());
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
    }

    #[test]
    fn wait_unblocks_cross_thread() {
        let sem = CountingSemaphore::new();
        let signaler = sem.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            signaler.signal();
        });
        sem.wait();
        t.join().unwrap();
    }
}
