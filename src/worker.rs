//! Worker thread implementation.
//!
//! Each worker owns a local LIFO deque. A worker looks for work in its own
//! deque first, then in the global priority queues, and finally steals from
//! the opposite end of a sibling's deque. Idle workers sleep on a condition
//! variable until a job is queued anywhere or the pool shuts down.

use crate::counter::Counter;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::metrics::Metrics;
use crate::profiler::Profiler;
use crate::queue::GlobalQueues;
use crate::scheduler::SchedulerConfig;
use crate::topology::Topology;
use crossbeam::deque::{Steal, Stealer, Worker as Deque};
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

/// State shared by every worker of one pool.
pub(crate) struct PoolShared {
    pool_id: usize,
    pub(crate) global: Mutex<GlobalQueues>,
    job_available: Condvar,
    running: AtomicBool,
    /// Jobs sitting in the global queues or in any local deque.
    queued: AtomicUsize,
    /// Workers currently executing a job.
    active: AtomicUsize,
    stealers: Vec<Stealer<Job>>,
    /// Outstanding non-persistent jobs.
    pub(crate) frame_jobs: Counter,
    pub(crate) profiler: Profiler,
    pub(crate) metrics: Metrics,
}

struct LocalSlot {
    pool_id: usize,
    index: usize,
    queue: Deque<Job>,
}

thread_local! {
    static LOCAL: RefCell<Option<LocalSlot>> = const { RefCell::new(None) };
}

/// Clears the thread-local slot when the worker loop exits.
struct LocalSlotGuard;

impl Drop for LocalSlotGuard {
    fn drop(&mut self) {
        LOCAL.with_borrow_mut(|slot| *slot = None);
    }
}

/// A worker thread that executes jobs.
pub struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Creates and starts a new worker thread with work-stealing support.
    fn new(
        id: usize,
        local_queue: Deque<Job>,
        shared: Arc<PoolShared>,
        config: &SchedulerConfig,
        topology: &Topology,
    ) -> Result<Self> {
        let strategy = config.pinning;
        let slot = config.reserved_threads + id;
        let topology = topology.clone();

        let handle = thread::Builder::new()
            .name(format!("{}-{}", config.thread_name_prefix, id))
            .spawn(move || {
                topology.pin_current(strategy, slot);
                Worker::run_loop(id, local_queue, shared);
            })
            .map_err(Error::ThreadSpawn)?;

        Ok(Worker {
            id,
            handle: Some(handle),
        })
    }

    fn run_loop(id: usize, local_queue: Deque<Job>, shared: Arc<PoolShared>) {
        LOCAL.with_borrow_mut(|slot| {
            *slot = Some(LocalSlot {
                pool_id: shared.pool_id,
                index: id,
                queue: local_queue,
            })
        });
        let _guard = LocalSlotGuard;
        tracing::debug!(worker = id, "worker started");

        loop {
            match Worker::find_job(id, &shared) {
                Some(job) => Worker::execute(id, job, &shared),
                None => {
                    let mut global = shared.global.lock();
                    if !shared.running.load(Ordering::Acquire)
                        && shared.queued.load(Ordering::SeqCst) == 0
                    {
                        break;
                    }
                    while shared.running.load(Ordering::Acquire)
                        && shared.queued.load(Ordering::SeqCst) == 0
                    {
                        shared.job_available.wait(&mut global);
                    }
                }
            }
        }

        tracing::debug!(worker = id, "worker exiting");
    }

    /// Local LIFO pop, then global queues by priority, then steal.
    fn find_job(id: usize, shared: &PoolShared) -> Option<Job> {
        let job = Worker::pop_local()
            .inspect(|_| Metrics::bump(&shared.metrics.local_queue_pops))
            .or_else(|| {
                shared
                    .global
                    .lock()
                    .pop()
                    .inspect(|_| Metrics::bump(&shared.metrics.global_queue_pops))
            })
            .or_else(|| Worker::steal(id, shared));

        if job.is_some() {
            shared.queued.fetch_sub(1, Ordering::SeqCst);
        }
        job
    }

    fn pop_local() -> Option<Job> {
        LOCAL.with_borrow(|slot| slot.as_ref().and_then(|s| s.queue.pop()))
    }

    /// Steals the oldest job from a sibling, starting with the next worker.
    fn steal(id: usize, shared: &PoolShared) -> Option<Job> {
        let count = shared.stealers.len();
        (1..count)
            .map(|offset| &shared.stealers[(id + offset) % count])
            .find_map(|stealer| loop {
                match stealer.steal() {
                    Steal::Success(job) => {
                        Metrics::bump(&shared.metrics.worker_steals_success);
                        break Some(job);
                    }
                    Steal::Empty => break None,
                    Steal::Retry => Metrics::bump(&shared.metrics.worker_steals_retry),
                }
            })
    }

    fn execute(id: usize, job: Job, shared: &PoolShared) {
        let label = shared
            .profiler
            .is_active()
            .then(|| (job.label().clone(), job.priority()));

        shared.active.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();
        let (ok, completion) = job.run();
        let end = Instant::now();
        shared.active.fetch_sub(1, Ordering::SeqCst);

        // Record before signalling so a frame drained by the counters
        // already holds this event.
        if let Some((name, priority)) = label {
            shared.profiler.record(id, &name, priority, start, end);
        }
        if !ok {
            Metrics::bump(&shared.metrics.jobs_panicked);
        }
        Metrics::bump(&shared.metrics.jobs_completed);
        drop(completion);
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> usize {
        self.id
    }

    /// True when called from this worker's own thread.
    fn is_current(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }

    /// Waits for the worker thread to finish.
    pub fn join(mut self) -> thread::Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.join()
        } else {
            Ok(())
        }
    }
}

/// A pool of worker threads with work-stealing support.
pub struct WorkerPool {
    workers: Vec<Worker>,
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Creates a pool of `num_threads` unpinned workers with default settings.
    pub fn new(num_threads: usize) -> Result<Self> {
        Self::new_with_config(num_threads, &SchedulerConfig::default().without_pinning())
    }

    /// Creates a pool of `num_threads` workers named and pinned per `config`.
    pub fn new_with_config(num_threads: usize, config: &SchedulerConfig) -> Result<Self> {
        if num_threads == 0 {
            return Err(Error::NoWorkers);
        }

        let topology = Topology::detect();
        let mut local_queues = Vec::with_capacity(num_threads);
        let mut stealers = Vec::with_capacity(num_threads);

        for _ in 0..num_threads {
            let deque = Deque::new_lifo();
            stealers.push(deque.stealer());
            local_queues.push(deque);
        }

        let shared = Arc::new(PoolShared {
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            global: Mutex::new(GlobalQueues::new()),
            job_available: Condvar::new(),
            running: AtomicBool::new(true),
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            stealers,
            frame_jobs: Counter::new(0),
            profiler: Profiler::new(num_threads, config.profile_history),
            metrics: Metrics::new(),
        });

        let mut pool = WorkerPool {
            workers: Vec::with_capacity(num_threads),
            shared,
        };

        for (id, local_queue) in local_queues.into_iter().enumerate() {
            // On failure the partially built pool is dropped, which joins the
            // workers already started.
            let worker = Worker::new(id, local_queue, Arc::clone(&pool.shared), config, &topology)?;
            pool.workers.push(worker);
        }

        Ok(pool)
    }

    pub(crate) fn shared(&self) -> &PoolShared {
        &self.shared
    }

    /// Attaches the pool's frame counter to non-persistent jobs and counts the
    /// job against its own counter. Must run under the global queue lock.
    fn prepare(&self, job: Job) -> Job {
        if let Some(counter) = job.counter() {
            counter.increment();
        }
        Metrics::bump(&self.shared.metrics.jobs_submitted);
        if job.is_persistent() {
            job
        } else {
            self.shared.frame_jobs.increment();
            job.with_frame_counter(self.shared.frame_jobs.clone())
        }
    }

    /// Submits a single job to the global queues.
    pub fn submit(&self, job: Job) {
        self.submit_batch(vec![job]);
    }

    /// Submits jobs to the global queues under one lock acquisition, then
    /// wakes every worker.
    pub fn submit_batch(&self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        {
            let mut global = self.shared.global.lock();
            for job in jobs {
                let job = self.prepare(job);
                self.shared.queued.fetch_add(1, Ordering::SeqCst);
                global.push(job);
            }
        }
        self.shared.job_available.notify_all();
    }

    /// Pushes a job onto the calling worker's local deque.
    ///
    /// Returns the job unchanged if the caller is not a worker of this pool.
    pub fn submit_local(&self, job: Job) -> std::result::Result<(), Job> {
        if self.current_worker_index().is_none() {
            return Err(job);
        }

        let job = {
            let _global = self.shared.global.lock();
            self.prepare(job)
        };
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        LOCAL.with_borrow(|slot| {
            if let Some(slot) = slot {
                slot.queue.push(job);
            }
        });

        // Lock before notifying so a worker between its predicate check and
        // its wait cannot miss the new job.
        drop(self.shared.global.lock());
        self.shared.job_available.notify_all();
        Ok(())
    }

    /// Index of the calling thread if it is one of this pool's workers.
    pub fn current_worker_index(&self) -> Option<usize> {
        LOCAL.with_borrow(|slot| {
            slot.as_ref()
                .filter(|s| s.pool_id == self.shared.pool_id)
                .map(|s| s.index)
        })
    }

    /// Returns the number of worker threads in the pool.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Returns the number of workers currently executing a job.
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Returns the number of jobs waiting in any queue.
    pub fn queued_count(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    fn stop_and_join(&mut self) -> usize {
        {
            let _global = self.shared.global.lock();
            self.shared.running.store(false, Ordering::Release);
        }
        self.shared.job_available.notify_all();

        let mut failed_count = 0;
        for worker in self.workers.drain(..) {
            let worker_id = worker.id();
            // The last pool handle was dropped inside a job. This thread exits
            // its loop once the job returns, so detach instead of joining.
            if worker.is_current() {
                tracing::debug!(worker = worker_id, "pool dropped on its own worker, detaching");
                continue;
            }
            if worker.join().is_err() {
                failed_count += 1;
                tracing::error!(worker = worker_id, "worker panicked during execution");
            }
        }
        failed_count
    }

    /// Shuts down the worker pool and waits for all threads to finish.
    ///
    /// Jobs still queued are executed before the workers exit.
    pub fn shutdown(mut self) -> Result<()> {
        match self.stop_and_join() {
            0 => Ok(()),
            count => Err(Error::WorkerPanicked { count }),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop_and_join();
        }
    }
}
