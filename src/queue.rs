//! Global per-priority job queues.
//!
//! One FIFO queue per [`JobPriority`]. The scheduler keeps them behind a single
//! mutex; this type itself does no locking.

use crate::job::{Job, JobPriority};
use std::collections::VecDeque;

/// The High, Medium and Low queues, indexed by priority.
#[derive(Debug, Default)]
pub struct GlobalQueues {
    queues: [VecDeque<Job>; 3],
}

impl GlobalQueues {
    /// Creates three empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a job to the tail of its priority's queue.
    pub fn push(&mut self, job: Job) {
        self.queues[job.priority().index()].push_back(job);
    }

    /// Pops the oldest job of the highest non-empty priority.
    pub fn pop(&mut self) -> Option<Job> {
        JobPriority::SCAN_ORDER
            .iter()
            .find_map(|p| self.queues[p.index()].pop_front())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    #[cfg(test)]
    fn len_of(&self, priority: JobPriority) -> usize {
        self.queues[priority.index()].len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }
}
