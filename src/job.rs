//! Job definitions and execution logic.
//!
//! Jobs are units of work that can be executed by the scheduler.
//! They encapsulate a named closure, a priority, a persistence flag and the
//! counters that are decremented once the job has run.

use crate::counter::Counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Boxed job body, used for heterogeneous batches.
pub type JobFn = Box<dyn FnOnce() + Send + 'static>;

/// Priority levels for global queue selection.
///
/// Workers always service `High` before `Medium` before `Low` when more than
/// one global queue holds work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum JobPriority {
    Low = 0,
    #[default]
    Medium = 1,
    High = 2,
}

impl JobPriority {
    /// All priorities, highest first. This is the scan order of the global queues.
    pub const SCAN_ORDER: [JobPriority; 3] =
        [JobPriority::High, JobPriority::Medium, JobPriority::Low];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Decrements the job's counters when dropped, so a panicking job still signals.
pub(crate) struct Completion {
    counter: Option<Counter>,
    frame: Option<Counter>,
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.decrement();
        }
        if let Some(frame) = self.frame.take() {
            frame.decrement();
        }
    }
}

/// A unit of work to be executed by the scheduler.
///
/// Consumed exactly once by whichever worker dequeues it.
pub struct Job {
    name: Cow<'static, str>,
    work: JobFn,
    counter: Option<Counter>,
    priority: JobPriority,
    persistent: bool,
    /// Scheduler-owned counter of outstanding non-persistent jobs.
    frame: Option<Counter>,
}

impl Job {
    /// Creates a new medium priority, non-persistent job.
    pub fn new<N, F>(name: N, work: F) -> Self
    where
        N: Into<Cow<'static, str>>,
        F: FnOnce() + Send + 'static,
    {
        Job::from_boxed(name.into(), Box::new(work))
    }

    pub(crate) fn from_boxed(name: Cow<'static, str>, work: JobFn) -> Self {
        Job {
            name,
            work,
            counter: None,
            priority: JobPriority::default(),
            persistent: false,
            frame: None,
        }
    }

    /// Attaches a completion counter that is decremented after the job ran.
    pub fn with_counter(mut self, counter: Counter) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Sets the global queue the job is pushed to.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the job as persistent: it is excluded from the per-frame drain.
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub(crate) fn with_frame_counter(mut self, frame: Counter) -> Self {
        self.frame = Some(frame);
        self
    }

    /// Name used in logs and profiles.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn label(&self) -> &Cow<'static, str> {
        &self.name
    }

    /// The completion counter attached by the submitter, if any.
    pub fn counter(&self) -> Option<&Counter> {
        self.counter.as_ref()
    }

    /// Returns the job's priority.
    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    /// True if the job is excluded from the per-frame drain.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Executes the job and decrements its counters.
    ///
    /// A panic inside the job body is caught and logged; the counters are
    /// decremented either way. Returns false if the job panicked.
    pub fn execute(self) -> bool {
        self.run().0
    }

    /// Runs the body without signalling completion. The counters are
    /// decremented when the returned [`Completion`] is dropped.
    pub(crate) fn run(self) -> (bool, Completion) {
        let Job {
            name,
            work,
            counter,
            priority,
            frame,
            ..
        } = self;
        let completion = Completion { counter, frame };

        let ok = match catch_unwind(AssertUnwindSafe(work)) {
            Ok(()) => true,
            Err(payload) => {
                let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                    *s
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.as_str()
                } else {
                    "unknown panic"
                };
                tracing::error!(job = %name, ?priority, "job panicked: {msg}");
                false
            }
        };
        (ok, completion)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("persistent", &self.persistent)
            .finish_non_exhaustive()
    }
}
