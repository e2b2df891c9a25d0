//! Error types for the scheduler and frame pipeline.

use std::io;
use thiserror::Error;

/// Errors surfaced by the scheduler, the frame pipeline and profile export.
#[derive(Debug, Error)]
pub enum Error {
    /// Not enough logical cores left after reserving the simulation and render threads.
    #[error("{logical} logical core(s) available but {reserved} are reserved; no worker threads left")]
    InsufficientHardwareThreads { logical: usize, reserved: usize },

    /// A scheduler was requested with an explicit worker count of zero.
    #[error("scheduler requires at least one worker thread")]
    NoWorkers,

    /// The OS refused to spawn a thread.
    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// One or more worker threads died instead of exiting cleanly.
    #[error("{count} worker thread(s) panicked")]
    WorkerPanicked { count: usize },

    /// The swapchain image count must be at least one.
    #[error("invalid swapchain image count {0}")]
    InvalidImageCount(usize),

    /// The render thread of the frame pipeline panicked.
    #[error("render thread panicked")]
    RenderThreadPanicked,

    #[error("failed to serialize profile: {0}")]
    ProfileExport(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
