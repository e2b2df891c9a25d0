//! Per-frame job profiling.
//!
//! Workers record one [`JobProfileEvent`] per executed job into their own
//! buffer while a frame window is open. Closing the window collects the
//! buffers into a [`FrameProfile`] kept in a bounded history. Profiles can be
//! exported as Chrome Tracing JSON (chrome://tracing or ui.perfetto.dev).

use crate::error::Result;
use crate::job::JobPriority;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Default number of frames retained in the profile history.
pub const DEFAULT_PROFILE_HISTORY: usize = 100;

/// A single executed job. Times are milliseconds since the frame start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProfileEvent {
    pub name: Cow<'static, str>,
    pub start_ms: f64,
    pub end_ms: f64,
    pub priority: JobPriority,
}

impl JobProfileEvent {
    /// Wall time of the job in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.end_ms - self.start_ms
    }
}

/// Everything recorded between one `begin_frame`/`end_frame` pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameProfile {
    /// Sequence number of the frame, starting at zero.
    pub frame: u64,
    /// Frame start in milliseconds since the profiler was created.
    pub start_ms: f64,
    pub duration_ms: f64,
    /// Events per worker, indexed by worker index.
    pub workers: Vec<Vec<JobProfileEvent>>,
}

impl FrameProfile {
    /// Number of jobs recorded across all workers.
    pub fn job_count(&self) -> usize {
        self.workers.iter().map(Vec::len).sum()
    }

    /// Iterates over `(worker_index, event)` pairs.
    pub fn events(&self) -> impl Iterator<Item = (usize, &JobProfileEvent)> {
        self.workers
            .iter()
            .enumerate()
            .flat_map(|(tid, events)| events.iter().map(move |e| (tid, e)))
    }

    /// Converts the frame into Chrome Tracing "complete" events.
    pub fn to_chrome_trace(&self) -> serde_json::Value {
        let events: Vec<_> = self
            .events()
            .map(|(tid, event)| {
                serde_json::json!({
                    "name": event.name,
                    "ph": "X",
                    "ts": (self.start_ms + event.start_ms) * 1000.0,
                    "dur": event.duration_ms() * 1000.0,
                    "pid": 1,
                    "tid": tid,
                    "args": { "priority": event.priority, "frame": self.frame },
                })
            })
            .collect();
        serde_json::Value::Array(events)
    }

    /// Writes the frame as a Chrome Tracing JSON file.
    pub fn write_chrome_trace<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &self.to_chrome_trace())?;
        writer.flush()?;
        Ok(())
    }
}

/// Collects job events per worker and keeps the last `capacity` frames.
pub struct Profiler {
    epoch: Instant,
    active: AtomicBool,
    /// Nanoseconds since `epoch` at which the open frame started.
    frame_start_ns: AtomicU64,
    next_frame: AtomicU64,
    worker_events: Vec<Mutex<Vec<JobProfileEvent>>>,
    history: Mutex<VecDeque<FrameProfile>>,
    capacity: usize,
}

impl Profiler {
    /// Creates a profiler with one event buffer per worker.
    pub fn new(num_workers: usize, capacity: usize) -> Self {
        Profiler {
            epoch: Instant::now(),
            active: AtomicBool::new(false),
            frame_start_ns: AtomicU64::new(0),
            next_frame: AtomicU64::new(0),
            worker_events: (0..num_workers).map(|_| Mutex::new(Vec::new())).collect(),
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// True while a frame window is open.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn since_epoch_ns(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_nanos() as u64
    }

    /// Clears the per-worker buffers and opens a new frame window.
    pub fn begin_frame(&self) {
        for events in &self.worker_events {
            events.lock().clear();
        }
        self.frame_start_ns
            .store(self.since_epoch_ns(Instant::now()), Ordering::Release);
        self.active.store(true, Ordering::Release);
    }

    /// Records one job execution for `worker` if a frame window is open.
    pub fn record(
        &self,
        worker: usize,
        name: &Cow<'static, str>,
        priority: JobPriority,
        start: Instant,
        end: Instant,
    ) {
        if !self.is_active() {
            return;
        }
        let Some(events) = self.worker_events.get(worker) else {
            return;
        };

        let frame_start = self.frame_start_ns.load(Ordering::Acquire);
        let to_ms = |at: Instant| {
            self.since_epoch_ns(at).saturating_sub(frame_start) as f64 / 1_000_000.0
        };

        events.lock().push(JobProfileEvent {
            name: name.clone(),
            start_ms: to_ms(start),
            end_ms: to_ms(end),
            priority,
        });
    }

    /// Closes the frame window and appends its profile to the history.
    pub fn end_frame(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            tracing::warn!("end_frame called without a matching begin_frame");
            return;
        }

        let now_ns = self.since_epoch_ns(Instant::now());
        let start_ns = self.frame_start_ns.load(Ordering::Acquire);
        let profile = FrameProfile {
            frame: self.next_frame.fetch_add(1, Ordering::Relaxed),
            start_ms: start_ns as f64 / 1_000_000.0,
            duration_ms: now_ns.saturating_sub(start_ns) as f64 / 1_000_000.0,
            workers: self
                .worker_events
                .iter()
                .map(|events| std::mem::take(&mut *events.lock()))
                .collect(),
        };

        let mut history = self.history.lock();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(profile);
    }

    /// Returns the frame recorded `frames_ago` frames before the latest one.
    ///
    /// Requests older than the retained history return the oldest frame.
    pub fn results(&self, frames_ago: usize) -> Option<FrameProfile> {
        let history = self.history.lock();
        let last = history.len().checked_sub(1)?;
        history.get(last - frames_ago.min(last)).cloned()
    }

    #[cfg(test)]
    fn history_len(&self) -> usize {
        self.history.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record_one(profiler: &Profiler, worker: usize, name: &'static str) {
        let start = Instant::now();
        let end = start + Duration::from_millis(2);
        profiler.record(worker, &Cow::Borrowed(name), JobPriority::High, start, end);
    }

    #[test]
    fn test_events_only_recorded_inside_window() {
        let profiler = Profiler::new(2, 10);
        record_one(&profiler, 0, "outside");

        profiler.begin_frame();
        record_one(&profiler, 1, "inside");
        profiler.end_frame();

        let frame = profiler.results(0).expect("one frame recorded");
        assert_eq!(frame.job_count(), 1);
        assert!(frame.workers[0].is_empty());
        assert_eq!(frame.workers[1][0].name, "inside");
        assert!(frame.workers[1][0].duration_ms() >= 1.9);
    }

    #[test]
    fn test_history_is_bounded() {
        let profiler = Profiler::new(1, 3);
        for _ in 0..5 {
            profiler.begin_frame();
            profiler.end_frame();
        }
        assert_eq!(profiler.history_len(), 3);
        assert_eq!(profiler.results(0).map(|f| f.frame), Some(4));
        assert_eq!(profiler.results(2).map(|f| f.frame), Some(2));
        // Clamped to the oldest retained frame.
        assert_eq!(profiler.results(50).map(|f| f.frame), Some(2));
    }

    #[test]
    fn test_no_history() {
        let profiler = Profiler::new(1, 3);
        assert!(profiler.results(0).is_none());
        profiler.end_frame();
        assert_eq!(profiler.history_len(), 0);
    }

    #[test]
    fn test_out_of_range_worker_ignored() {
        let profiler = Profiler::new(1, 3);
        profiler.begin_frame();
        record_one(&profiler, 7, "nobody");
        profiler.end_frame();
        assert_eq!(profiler.results(0).map(|f| f.job_count()), Some(0));
    }

    #[test]
    fn test_chrome_trace_shape() {
        let profiler = Profiler::new(2, 3);
        profiler.begin_frame();
        record_one(&profiler, 1, "snapshot");
        profiler.end_frame();

        let trace = profiler.results(0).unwrap().to_chrome_trace();
        let events = trace.as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["name"], "snapshot");
        assert_eq!(events[0]["ph"], "X");
        assert_eq!(events[0]["tid"], 1);
        assert_eq!(events[0]["args"]["priority"], "High");
    }
}
