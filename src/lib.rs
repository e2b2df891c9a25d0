//! # framepipe - Priority Work-Stealing Job Scheduler and Frame Pipeline
//!
//! The concurrency backbone of a real-time interactive application: a fixed
//! pool of worker threads that execute prioritized jobs, plus the two-thread
//! (simulation + render) frame pipeline that drives it with triple-buffered
//! look-ahead.
//!
//! ## Architecture
//!
//! - **Counters**: completion barriers; incremented on submission, decremented
//!   when a job finishes, `wait()` blocks until zero
//! - **Jobs**: named closures with a priority and a persistence flag
//! - **Workers**: one OS thread each, with a local LIFO deque that siblings
//!   steal from in FIFO order
//! - **Scheduler**: global High/Medium/Low queues, frame-scoped draining and
//!   per-frame profiling
//! - **Frame pipeline**: simulation and render threads meeting at two
//!   rendezvous barriers while snapshot and record jobs run ahead
//!
//! ## Example
//!
//! ```no_run
//! use framepipe::{Counter, JobPriority, Scheduler};
//!
//! let scheduler = Scheduler::init().expect("not enough cores");
//!
//! let counter = Counter::default();
//! scheduler.submit_job("hello", || println!("Hello from a job!"), Some(&counter), JobPriority::High, false);
//! counter.wait();
//!
//! scheduler.finish_jobs();
//! scheduler.shutdown().unwrap();
//! ```

pub mod barrier;
pub mod counter;
pub mod error;
pub mod job;
pub mod metrics;
pub mod pipeline;
pub mod profiler;
pub mod queue;
pub mod scheduler;
pub mod topology;
pub mod worker;

use serde::{Deserialize, Serialize};

/// Strategy for pinning threads to CPU cores.
///
/// Core slot 0 is the simulation thread, slot 1 the render thread and worker
/// `i` uses slot `2 + i` (with the default two reserved threads).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (slot i -> logical processor i).
    Linear,
    /// Pin to physical cores only (even-numbered logical processors), avoiding SMT contention.
    AvoidSMT,
}

pub use barrier::{Participant, RendezvousBarrier};
pub use counter::Counter;
pub use error::{Error, Result};
pub use job::{Job, JobFn, JobPriority};
pub use pipeline::{
    FramePipeline, FrameSlots, FrameTarget, PipelineConfig, PipelineStats, RenderHooks,
    SimulationHooks,
};
pub use profiler::{FrameProfile, JobProfileEvent};
pub use scheduler::{Scheduler, SchedulerConfig};
