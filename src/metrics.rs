use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Scheduler counters. Updated with relaxed atomics from every worker.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of jobs submitted (global and local).
    pub jobs_submitted: AtomicU64,
    /// Total number of jobs executed.
    pub jobs_completed: AtomicU64,
    /// Jobs whose body panicked.
    pub jobs_panicked: AtomicU64,
    /// Pops from the owning worker's local queue.
    pub local_queue_pops: AtomicU64,
    /// Pops from the global priority queues.
    pub global_queue_pops: AtomicU64,
    /// Successful steals from other workers.
    pub worker_steals_success: AtomicU64,
    /// Steal attempts from other workers that need retry (contention).
    pub worker_steals_retry: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

impl Metrics {
    /// Creates zeroed counters and starts the clock.
    pub fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_panicked: AtomicU64::new(0),
            local_queue_pops: AtomicU64::new(0),
            global_queue_pops: AtomicU64::new(0),
            worker_steals_success: AtomicU64::new(0),
            worker_steals_retry: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_panicked: self.jobs_panicked.load(Ordering::Relaxed),
            local_queue_pops: self.local_queue_pops.load(Ordering::Relaxed),
            global_queue_pops: self.global_queue_pops.load(Ordering::Relaxed),
            worker_steals_success: self.worker_steals_success.load(Ordering::Relaxed),
            worker_steals_retry: self.worker_steals_retry.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_panicked: u64,
    pub local_queue_pops: u64,
    pub global_queue_pops: u64,
    pub worker_steals_success: u64,
    pub worker_steals_retry: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Calculates jobs per second throughput.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_completed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Jobs submitted but not yet finished.
    pub fn in_flight(&self) -> u64 {
        self.jobs_submitted.saturating_sub(self.jobs_completed)
    }
}
