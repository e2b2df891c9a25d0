//! Counter-based synchronization primitives for job completion tracking.
//!
//! A [`Counter`] is incremented once per job before the jobs are enqueued and
//! decremented once per job after it ran. Threads blocked in [`Counter::wait`]
//! are released when the value transitions to zero.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct InnerCounter {
    value: AtomicUsize,
    lock: Mutex<()>,
    zero: Condvar,
}

/// A thread-safe completion counter.
///
/// Cloning a `Counter` produces another handle to the same value, so a job can
/// keep its counter alive for as long as it needs it regardless of what the
/// submitter does with its own handle.
///
/// A counter is not meant to be re-armed while a [`wait`](Counter::wait) on the
/// previous wave is outstanding: start the next wave of increments after the
/// wait returned, or use a fresh counter.
#[derive(Clone)]
pub struct Counter {
    inner: Arc<InnerCounter>,
}

impl Counter {
    /// Creates a new counter with the specified initial value.
    pub fn new(initial: usize) -> Self {
        Counter {
            inner: Arc::new(InnerCounter {
                value: AtomicUsize::new(initial),
                lock: Mutex::new(()),
                zero: Condvar::new(),
            }),
        }
    }

    /// Increments the counter by one.
    pub fn increment(&self) {
        self.increment_by(1);
    }

    /// Increments the counter by `n`.
    pub fn increment_by(&self, n: usize) {
        self.inner.value.fetch_add(n, Ordering::SeqCst);
    }

    /// Decrements the counter by one and wakes all waiters if it reached zero.
    ///
    /// Returns true if this call brought the counter to zero. Decrementing a
    /// counter that is already zero leaves it at zero and returns false.
    pub fn decrement(&self) -> bool {
        let previous = self
            .inner
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));

        match previous {
            Ok(1) => {
                // Taking the lock orders the notification after any waiter that
                // already checked the value but has not parked yet.
                let _guard = self.inner.lock.lock();
                self.inner.zero.notify_all();
                true
            }
            Ok(_) => false,
            Err(_) => {
                tracing::warn!("counter decremented below zero; ignoring");
                false
            }
        }
    }

    /// Blocks the calling thread until the counter reaches zero.
    pub fn wait(&self) {
        if self.is_complete() {
            return;
        }

        let mut guard = self.inner.lock.lock();
        while !self.is_complete() {
            self.inner.zero.wait(&mut guard);
        }
    }

    /// Returns the current value of the counter.
    pub fn value(&self) -> usize {
        self.inner.value.load(Ordering::SeqCst)
    }

    /// Checks if the counter has reached zero.
    pub fn is_complete(&self) -> bool {
        self.value() == 0
    }
}

impl Default for Counter {
    fn default() -> Self {
        Counter::new(0)
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter").field("value", &self.value()).finish()
    }
}
