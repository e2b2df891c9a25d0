//! Two-thread frame pipeline driven by the scheduler.
//!
//! The simulation thread (the caller of [`FramePipeline::run`]) and a
//! dedicated render thread meet at two rendezvous points every tick:
//! `FrameStart` and `FrameRenderFinished`. Between them the render thread
//! submits look-ahead work: a scene snapshot for the image shown two ticks
//! from now and a command-recording job for the image shown next tick, then
//! presents the image prepared one tick ago. The simulation thread runs its
//! update passes and animation/transform jobs in parallel.
//!
//! ```text
//!   tick N    snapshot(N+2) ─┐
//!   tick N+1                 └─> record(N+2) ─┐
//!   tick N+2                                  └─> present(N+2)
//! ```

use crate::PinningStrategy;
use crate::barrier::{Participant, RendezvousBarrier};
use crate::counter::Counter;
use crate::error::{Error, Result};
use crate::job::JobPriority;
use crate::scheduler::Scheduler;
use crate::topology::{RENDER_SLOT, Topology};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

/// The display frame a piece of work is for, and the swapchain image slot it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameTarget {
    pub frame: u64,
    pub slot: usize,
}

/// Scene-side collaborators called by the simulation thread.
///
/// `blend_animation` and `merge_transforms` run as scheduler jobs; everything
/// else runs inline on the simulation thread.
pub trait SimulationHooks: Send + Sync + 'static {
    fn blend_animation(&self) {}
    fn update(&self) {}
    fn fixed_update(&self) {}
    fn late_update(&self) {}
    fn build_gui(&self) {}
    fn merge_transforms(&self) {}
    /// Records the GUI pass for the image presented this tick.
    fn render_gui(&self, _target: FrameTarget) {}
    /// Polls window and input events. Returning false ends the pipeline.
    fn poll_events(&self) -> bool {
        true
    }
}

/// Rendering collaborators called by the render thread and its jobs.
pub trait RenderHooks: Send + Sync + 'static {
    /// True while the presentation surface has zero area (minimized window).
    fn surface_is_empty(&self) -> bool {
        false
    }
    /// Captures scene and camera state for `target`. Runs as a high priority job.
    fn snapshot_scene(&self, target: FrameTarget);
    /// Records command buffers for `target` from its snapshot. Runs as a persistent job.
    fn record_commands(&self, target: FrameTarget);
    /// Submits the recorded commands for `target` and presents it.
    fn submit_and_present(&self, target: FrameTarget);
}

/// Configuration for the frame pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Swapchain image count. Default: 3.
    pub image_count: usize,
    /// Pinning of the render thread. Default: `None`.
    pub pinning: PinningStrategy,
    /// Name of the render thread. Default: `"render"`.
    pub render_thread_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_count: 3,
            pinning: PinningStrategy::None,
            render_thread_name: "render".to_owned(),
        }
    }
}

/// Per-image completion counters.
///
/// `snapshot[i]` signals that the scene snapshot for image `i` is ready,
/// `prepared[i]` that its command buffers are recorded. Both arrays hold
/// `image_count + 1` counters and are indexed by `(tick + ahead) % image_count`.
/// The counters are reused every cycle: each wave is waited to zero before
/// the slot is armed again.
pub struct FrameSlots {
    image_count: usize,
    snapshot: Vec<Counter>,
    prepared: Vec<Counter>,
}

impl FrameSlots {
    /// Allocates both counter arrays. Fails for an image count of zero.
    pub fn new(image_count: usize) -> Result<Self> {
        if image_count == 0 {
            return Err(Error::InvalidImageCount(image_count));
        }
        Ok(FrameSlots {
            image_count,
            snapshot: (0..=image_count).map(|_| Counter::default()).collect(),
            prepared: (0..=image_count).map(|_| Counter::default()).collect(),
        })
    }

    /// Image slot used `ahead` ticks after `tick`.
    pub fn slot(&self, tick: u64, ahead: u64) -> usize {
        ((tick + ahead) % self.image_count as u64) as usize
    }

    /// Frame number and slot `ahead` ticks after `tick`.
    pub fn target(&self, tick: u64, ahead: u64) -> FrameTarget {
        FrameTarget {
            frame: tick + ahead,
            slot: self.slot(tick, ahead),
        }
    }

    /// Counter signalling that the scene snapshot for `slot` is ready.
    pub fn snapshot(&self, slot: usize) -> &Counter {
        &self.snapshot[slot]
    }

    /// Counter signalling that the commands for `slot` are recorded.
    pub fn prepared(&self, slot: usize) -> &Counter {
        &self.prepared[slot]
    }
}

/// Summary returned by [`FramePipeline::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Ticks completed by the simulation thread.
    pub frames: u64,
    /// Ticks in which the render thread skipped presentation.
    pub minimized_frames: u64,
}

struct PipelineShared {
    slots: FrameSlots,
    frame_start: RendezvousBarrier,
    render_finished: RendezvousBarrier,
    running: AtomicBool,
    minimized_frames: AtomicU64,
}

impl PipelineShared {
    /// Stops the pipeline and removes `who` from both barriers.
    fn leave(&self, who: Participant) {
        self.running.store(false, Ordering::Release);
        self.frame_start.arrive_and_drop(who);
        self.render_finished.arrive_and_drop(who);
    }
}

/// Leaves both barriers when a pipeline thread exits, including by panic,
/// so the other thread is never left waiting.
struct LeaveGuard<'a> {
    shared: &'a PipelineShared,
    who: Participant,
}

impl Drop for LeaveGuard<'_> {
    fn drop(&mut self) {
        self.shared.leave(self.who);
    }
}

/// The simulation/render frame loop over a shared [`Scheduler`].
pub struct FramePipeline {
    scheduler: Arc<Scheduler>,
    config: PipelineConfig,
    shared: Arc<PipelineShared>,
    simulation: Arc<dyn SimulationHooks>,
    renderer: Arc<dyn RenderHooks>,
}

impl FramePipeline {
    /// Builds the pipeline. The render thread is started by [`run`](Self::run).
    pub fn new(
        scheduler: Arc<Scheduler>,
        config: PipelineConfig,
        simulation: Arc<dyn SimulationHooks>,
        renderer: Arc<dyn RenderHooks>,
    ) -> Result<Self> {
        let shared = Arc::new(PipelineShared {
            slots: FrameSlots::new(config.image_count)?,
            frame_start: RendezvousBarrier::two_party("FrameStart"),
            render_finished: RendezvousBarrier::two_party("FrameRenderFinished"),
            running: AtomicBool::new(true),
            minimized_frames: AtomicU64::new(0),
        });

        Ok(FramePipeline {
            scheduler,
            config,
            shared,
            simulation,
            renderer,
        })
    }

    /// The per-image counters shared by both threads.
    pub fn slots(&self) -> &FrameSlots {
        &self.shared.slots
    }

    /// Runs the pipeline on the calling thread (the simulation thread) until
    /// `poll_events` returns false or `max_frames` ticks have completed.
    pub fn run(self, max_frames: Option<u64>) -> Result<PipelineStats> {
        let render = {
            let scheduler = Arc::clone(&self.scheduler);
            let shared = Arc::clone(&self.shared);
            let renderer = Arc::clone(&self.renderer);
            let pinning = self.config.pinning;

            thread::Builder::new()
                .name(self.config.render_thread_name.clone())
                .spawn(move || {
                    if pinning != PinningStrategy::None {
                        Topology::detect().pin_current(pinning, RENDER_SLOT);
                    }
                    render_loop(&scheduler, &shared, &renderer);
                })
                .map_err(Error::ThreadSpawn)?
        };
        tracing::info!(image_count = self.config.image_count, "frame pipeline started");

        let frames = {
            let _leave = LeaveGuard {
                shared: &self.shared,
                who: Participant::Simulation,
            };

            let mut tick = 0;
            while max_frames.is_none_or(|max| tick < max) {
                let keep_going = self.simulation_tick(tick);
                tick += 1;
                // A render thread that left early has already cleared the flag.
                if !keep_going || !self.shared.running.load(Ordering::Acquire) {
                    break;
                }
            }
            tick
        };

        render.join().map_err(|_| Error::RenderThreadPanicked)?;
        self.scheduler.finish_jobs();

        let stats = PipelineStats {
            frames,
            minimized_frames: self.shared.minimized_frames.load(Ordering::Relaxed),
        };
        tracing::info!(frames = stats.frames, minimized = stats.minimized_frames, "frame pipeline stopped");
        Ok(stats)
    }

    fn simulation_tick(&self, tick: u64) -> bool {
        let _span = tracing::debug_span!("simulation_tick", tick).entered();
        let scheduler = &self.scheduler;
        let shared = &self.shared;

        scheduler.begin_frame_profile();
        shared.frame_start.arrive_and_wait(Participant::Simulation);

        let animation = Counter::default();
        let sim = Arc::clone(&self.simulation);
        scheduler.submit_job(
            "blend_animation",
            move || sim.blend_animation(),
            Some(&animation),
            JobPriority::Medium,
            false,
        );

        self.simulation.update();
        self.simulation.fixed_update();
        self.simulation.late_update();
        self.simulation.build_gui();
        animation.wait();

        let merged = Counter::default();
        let sim = Arc::clone(&self.simulation);
        scheduler.submit_job(
            "merge_transforms",
            move || sim.merge_transforms(),
            Some(&merged),
            JobPriority::High,
            false,
        );

        if !self.renderer.surface_is_empty() {
            self.simulation.render_gui(shared.slots.target(tick, 0));
        }
        shared
            .render_finished
            .arrive_and_wait(Participant::Simulation);

        let keep_going = self.simulation.poll_events();
        merged.wait();
        scheduler.finish_jobs();
        scheduler.end_frame_profile();
        keep_going
    }
}

fn render_loop(scheduler: &Scheduler, shared: &PipelineShared, renderer: &Arc<dyn RenderHooks>) {
    let _leave = LeaveGuard {
        shared,
        who: Participant::Render,
    };
    tracing::debug!("render thread started");

    let mut tick = 0;
    loop {
        shared.frame_start.arrive_and_wait(Participant::Render);
        if !shared.running.load(Ordering::Acquire) {
            break;
        }

        if render_tick(scheduler, &shared.slots, renderer, tick) {
            shared.minimized_frames.fetch_add(1, Ordering::Relaxed);
        }
        shared.render_finished.arrive_and_wait(Participant::Render);
        tick += 1;
    }

    tracing::debug!(ticks = tick, "render thread exiting");
}

/// One render-thread tick. Returns true if presentation was skipped.
fn render_tick(
    scheduler: &Scheduler,
    slots: &FrameSlots,
    renderer: &Arc<dyn RenderHooks>,
    tick: u64,
) -> bool {
    let _span = tracing::debug_span!("render_tick", tick).entered();
    let snapshot_target = slots.target(tick, 2);
    let record_target = slots.target(tick, 1);
    let present_target = slots.target(tick, 0);

    let r = Arc::clone(renderer);
    scheduler.submit_job(
        "snapshot_scene",
        move || r.snapshot_scene(snapshot_target),
        Some(slots.snapshot(snapshot_target.slot)),
        JobPriority::High,
        false,
    );

    let r = Arc::clone(renderer);
    let snapshot_ready = slots.snapshot(record_target.slot).clone();
    scheduler.submit_job(
        "record_commands",
        move || {
            snapshot_ready.wait();
            r.record_commands(record_target);
        },
        Some(slots.prepared(record_target.slot)),
        JobPriority::Medium,
        true,
    );

    slots.prepared(present_target.slot).wait();

    let minimized = renderer.surface_is_empty();
    if minimized {
        tracing::trace!(tick, "surface is empty, skipping present");
    } else {
        renderer.submit_and_present(present_target);
    }
    minimized
}
