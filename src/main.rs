use framepipe::{
    Error, FramePipeline, FrameTarget, JobPriority, PipelineConfig, RenderHooks, Scheduler,
    SchedulerConfig, SimulationHooks,
};
use parking_lot::Mutex;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const DEFAULT_FRAMES: u64 = 120;
const NUM_ENTITIES: usize = 4096;

/// Burns roughly `iterations` worth of arithmetic.
fn spin(iterations: u64) -> u64 {
    (0..iterations).fold(0u64, |acc, i| black_box(acc.wrapping_mul(31).wrapping_add(i)))
}

/// A toy scene: entity positions advanced every tick and copied out by the
/// snapshot job.
struct DemoScene {
    positions: Mutex<Vec<f32>>,
    velocities: Vec<f32>,
}

impl DemoScene {
    fn new() -> Self {
        DemoScene {
            positions: Mutex::new(vec![0.0; NUM_ENTITIES]),
            velocities: (0..NUM_ENTITIES).map(|i| (i % 17) as f32 * 0.1).collect(),
        }
    }
}

impl SimulationHooks for DemoScene {
    fn blend_animation(&self) {
        spin(20_000);
    }

    fn update(&self) {
        let mut positions = self.positions.lock();
        for (p, v) in positions.iter_mut().zip(&self.velocities) {
            *p += v * (1.0 / 60.0);
        }
    }

    fn fixed_update(&self) {
        spin(5_000);
    }

    fn merge_transforms(&self) {
        spin(10_000);
    }

    fn render_gui(&self, _target: FrameTarget) {
        spin(2_000);
    }
}

struct DemoRenderer {
    scene: Arc<DemoScene>,
    /// Snapshot buffer per image slot.
    snapshots: Vec<Mutex<Vec<f32>>>,
    presented: Mutex<Vec<u64>>,
}

impl DemoRenderer {
    fn new(scene: Arc<DemoScene>, image_count: usize) -> Self {
        DemoRenderer {
            scene,
            snapshots: (0..image_count).map(|_| Mutex::new(Vec::new())).collect(),
            presented: Mutex::new(Vec::new()),
        }
    }
}

impl RenderHooks for DemoRenderer {
    fn snapshot_scene(&self, target: FrameTarget) {
        let positions = self.scene.positions.lock().clone();
        *self.snapshots[target.slot].lock() = positions;
    }

    fn record_commands(&self, target: FrameTarget) {
        let snapshot = self.snapshots[target.slot].lock();
        let checksum: f32 = snapshot.iter().sum();
        black_box(checksum);
        spin(15_000);
    }

    fn submit_and_present(&self, target: FrameTarget) {
        self.presented.lock().push(target.frame);
    }
}

fn load_config() -> framepipe::Result<SchedulerConfig> {
    match std::env::var("FRAMEPIPE_CONFIG") {
        Ok(path) => SchedulerConfig::from_json(&std::fs::read_to_string(path)?),
        Err(_) => Ok(SchedulerConfig::default()),
    }
}

fn main() -> framepipe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    let mut args = std::env::args().skip(1);
    let frames = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_FRAMES);
    let trace_path = args.next();

    println!("framepipe - Priority Work-Stealing Scheduler + Frame Pipeline\n");

    let scheduler = match Scheduler::with_config(load_config()?) {
        Ok(scheduler) => scheduler,
        Err(Error::InsufficientHardwareThreads { logical, reserved }) => {
            tracing::warn!(logical, reserved, "not enough cores, falling back to 2 unpinned workers");
            Scheduler::new(2)?
        }
        Err(e) => return Err(e),
    };
    let scheduler = Arc::new(scheduler);
    println!("Initialized scheduler with {} worker threads\n", scheduler.num_workers());

    // Warm-up: a batch of independent jobs.
    println!("Example 1: Parallel batch");
    let counter = framepipe::Counter::default();
    let start = Instant::now();
    for i in 0..1000u64 {
        scheduler.submit_job(
            "warmup",
            move || {
                spin(i % 100);
            },
            Some(&counter),
            JobPriority::Low,
            false,
        );
    }
    counter.wait();
    println!("  Executed 1000 jobs in {:?}\n", start.elapsed());

    println!("Example 2: Frame pipeline ({frames} frames)");
    let config = PipelineConfig::default();
    let scene = Arc::new(DemoScene::new());
    let renderer = Arc::new(DemoRenderer::new(scene.clone(), config.image_count));
    let pipeline = FramePipeline::new(scheduler.clone(), config, scene, renderer.clone())?;

    let start = Instant::now();
    let stats = pipeline.run(Some(frames))?;
    let elapsed = start.elapsed();
    let fps = stats.frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    println!("  Ran {} frames in {:?} ({:.1} fps)", stats.frames, elapsed, fps);
    println!("  Presented {} images\n", renderer.presented.lock().len());

    if let Some(profile) = scheduler.profile_results(0) {
        println!("Last frame profile (frame {}, {:.3} ms):", profile.frame, profile.duration_ms);
        for (worker, event) in profile.events() {
            println!(
                "  worker {worker:>2} {:<18} {:>8.3} ms  {:?}",
                event.name,
                event.duration_ms(),
                event.priority
            );
        }
        println!();
    }

    if let Some(path) = trace_path {
        if scheduler.export_profile(0, &path)? {
            println!("Wrote Chrome trace to {path}\n");
        }
    }

    let metrics = scheduler.metrics();
    println!(
        "Jobs: {} submitted, {} completed, {} stolen, {:.0} jobs/s",
        metrics.jobs_submitted,
        metrics.jobs_completed,
        metrics.worker_steals_success,
        metrics.jobs_per_second()
    );

    // Queued jobs, including the last persistent record job, drain on shutdown.
    println!("Shutting down scheduler...");
    match Arc::try_unwrap(scheduler) {
        Ok(scheduler) => scheduler.shutdown()?,
        Err(_) => tracing::warn!("scheduler still shared, relying on drop to join workers"),
    }
    println!("Done!");
    Ok(())
}
