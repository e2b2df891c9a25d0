//! High-level scheduler interface.
//!
//! The [`Scheduler`] is the entry point for submitting prioritized jobs,
//! tracking their completion through [`Counter`]s, draining frame-scoped work
//! and collecting per-frame profiles. One instance is created at startup and
//! shared (usually as an `Arc`) with everything that submits work.

use crate::PinningStrategy;
use crate::counter::Counter;
use crate::error::{Error, Result};
use crate::job::{Job, JobFn, JobPriority};
use crate::metrics::MetricsSnapshot;
use crate::profiler::{DEFAULT_PROFILE_HISTORY, FrameProfile};
use crate::topology::{SIMULATION_SLOT, Topology};
use crate::worker::WorkerPool;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::Path;

/// Configuration for the scheduler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Logical cores kept free for the simulation and render threads. Default: 2.
    pub reserved_threads: usize,
    /// Explicit worker count. `None` uses every logical core not reserved.
    pub worker_threads: Option<usize>,
    /// How workers (and the calling thread) are pinned to cores. Default: `Linear`.
    pub pinning: PinningStrategy,
    /// Number of frame profiles retained. Default: 100.
    pub profile_history: usize,
    /// Worker thread name prefix. Default: `"job-worker"`.
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reserved_threads: 2,
            worker_threads: None,
            pinning: PinningStrategy::Linear,
            profile_history: DEFAULT_PROFILE_HISTORY,
            thread_name_prefix: "job-worker".to_owned(),
        }
    }
}

impl SchedulerConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Disables pinning for workers and the calling thread.
    pub fn without_pinning(mut self) -> Self {
        self.pinning = PinningStrategy::None;
        self
    }

    /// Resolves the worker count against the detected logical core count.
    pub fn worker_count(&self, logical_cores: usize) -> Result<usize> {
        match self.worker_threads {
            Some(0) => Err(Error::NoWorkers),
            Some(n) => Ok(n),
            None => match logical_cores.checked_sub(self.reserved_threads) {
                Some(n) if n > 0 => Ok(n),
                _ => Err(Error::InsufficientHardwareThreads {
                    logical: logical_cores,
                    reserved: self.reserved_threads,
                }),
            },
        }
    }
}

/// Priority work-stealing job scheduler.
pub struct Scheduler {
    pool: WorkerPool,
}

impl Scheduler {
    /// Creates a scheduler with `num_workers` unpinned worker threads.
    ///
    /// # Example
    ///
    /// ```
    /// use framepipe::Scheduler;
    ///
    /// let scheduler = Scheduler::new(2).unwrap();
    /// assert_eq!(scheduler.num_workers(), 2);
    /// scheduler.shutdown().unwrap();
    /// ```
    pub fn new(num_workers: usize) -> Result<Self> {
        Self::with_config(SchedulerConfig {
            worker_threads: Some(num_workers),
            ..SchedulerConfig::default().without_pinning()
        })
    }

    /// Creates a scheduler sized to the machine: one worker per logical core
    /// minus the two reserved for the simulation and render threads, pinned
    /// linearly. The calling thread is pinned to core 0.
    ///
    /// Fails with [`Error::InsufficientHardwareThreads`] when no core is left
    /// for workers.
    pub fn init() -> Result<Self> {
        Self::with_config(SchedulerConfig::default())
    }

    /// Creates a scheduler from an explicit configuration.
    ///
    /// Pins the calling thread to the simulation core unless pinning is disabled.
    pub fn with_config(config: SchedulerConfig) -> Result<Self> {
        let topology = Topology::detect();
        let num_workers = config.worker_count(topology.logical_cores)?;

        if config.pinning != PinningStrategy::None {
            topology.pin_current(config.pinning, SIMULATION_SLOT);
        }

        let pool = WorkerPool::new_with_config(num_workers, &config)?;
        tracing::info!(
            workers = num_workers,
            logical_cores = topology.logical_cores,
            reserved = config.reserved_threads,
            pinning = ?config.pinning,
            "scheduler started"
        );
        Ok(Scheduler { pool })
    }

    fn build_job(
        name: Cow<'static, str>,
        work: JobFn,
        counter: Option<&Counter>,
        priority: JobPriority,
        persistent: bool,
    ) -> Job {
        let job = Job::from_boxed(name, work)
            .with_priority(priority)
            .persistent(persistent);
        match counter {
            Some(counter) => job.with_counter(counter.clone()),
            None => job,
        }
    }

    /// Submits a job to the global queue of its priority.
    ///
    /// The counter, if any, is incremented before the job becomes visible to
    /// workers and decremented once after the job ran.
    ///
    /// # Example
    ///
    /// ```
    /// use framepipe::{Counter, JobPriority, Scheduler};
    ///
    /// let scheduler = Scheduler::new(2).unwrap();
    /// let counter = Counter::default();
    /// scheduler.submit_job("hello", || println!("hello"), Some(&counter), JobPriority::High, false);
    /// counter.wait();
    /// scheduler.shutdown().unwrap();
    /// ```
    pub fn submit_job<N, F>(
        &self,
        name: N,
        work: F,
        counter: Option<&Counter>,
        priority: JobPriority,
        persistent: bool,
    ) where
        N: Into<Cow<'static, str>>,
        F: FnOnce() + Send + 'static,
    {
        let job = Self::build_job(name.into(), Box::new(work), counter, priority, persistent);
        self.pool.submit(job);
    }

    /// Submits a batch of jobs sharing one priority, persistence flag and counter.
    pub fn submit_jobs<I, N>(
        &self,
        jobs: I,
        counter: Option<&Counter>,
        priority: JobPriority,
        persistent: bool,
    ) where
        I: IntoIterator<Item = (N, JobFn)>,
        N: Into<Cow<'static, str>>,
    {
        let jobs: Vec<_> = jobs
            .into_iter()
            .map(|(name, work)| Self::build_job(name.into(), work, counter, priority, persistent))
            .collect();
        self.pool.submit_batch(jobs);
    }

    /// Submits a sub-job from inside a running job.
    ///
    /// On a worker of this scheduler the job is pushed onto that worker's
    /// local deque, where the owner picks it up next and idle siblings may
    /// steal it. Anywhere else this is the same as [`submit_job`](Self::submit_job).
    pub fn spawn_local<N, F>(
        &self,
        name: N,
        work: F,
        counter: Option<&Counter>,
        priority: JobPriority,
        persistent: bool,
    ) where
        N: Into<Cow<'static, str>>,
        F: FnOnce() + Send + 'static,
    {
        let job = Self::build_job(name.into(), Box::new(work), counter, priority, persistent);
        if let Err(job) = self.pool.submit_local(job) {
            self.pool.submit(job);
        }
    }

    /// Blocks until every non-persistent job submitted so far has completed.
    ///
    /// Persistent jobs are not waited for. Must not be called from inside a
    /// job: the calling job would wait for itself.
    pub fn finish_jobs(&self) {
        debug_assert!(
            self.current_worker_index().is_none(),
            "finish_jobs called from a worker thread"
        );
        self.pool.shared().frame_jobs.wait();
    }

    /// Number of non-persistent jobs queued or running.
    pub fn pending_frame_jobs(&self) -> usize {
        self.pool.shared().frame_jobs.value()
    }

    /// Resets the per-worker event buffers and starts timing a new frame.
    pub fn begin_frame_profile(&self) {
        self.pool.shared().profiler.begin_frame();
    }

    /// Closes the current frame and appends it to the profile history.
    pub fn end_frame_profile(&self) {
        self.pool.shared().profiler.end_frame();
    }

    /// Returns the profile recorded `frames_ago` frames before the latest,
    /// clamped to the oldest retained frame.
    pub fn profile_results(&self, frames_ago: usize) -> Option<FrameProfile> {
        self.pool.shared().profiler.results(frames_ago)
    }

    /// Writes the selected frame profile as a Chrome Tracing JSON file.
    ///
    /// Returns false if no frame has been recorded yet.
    pub fn export_profile<P: AsRef<Path>>(&self, frames_ago: usize, path: P) -> Result<bool> {
        match self.profile_results(frames_ago) {
            Some(profile) => {
                profile.write_chrome_trace(path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Returns the number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.pool.size()
    }

    /// Returns the number of workers currently executing a job.
    pub fn active_workers(&self) -> usize {
        self.pool.active_count()
    }

    /// Returns the number of jobs waiting in the global or local queues.
    pub fn queued_jobs(&self) -> usize {
        self.pool.queued_count()
    }

    /// Worker index of the calling thread, if it is one of this scheduler's workers.
    pub fn current_worker_index(&self) -> Option<usize> {
        self.pool.current_worker_index()
    }

    /// Returns a snapshot of the scheduler counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.pool.shared().metrics.snapshot()
    }

    /// Stops the workers and joins them.
    ///
    /// Jobs still queued are executed first. Returns an error if any worker
    /// thread panicked.
    pub fn shutdown(self) -> Result<()> {
        tracing::info!("scheduler shutting down");
        self.pool.shutdown()
    }
}
