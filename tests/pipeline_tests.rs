use framepipe::{
    Error, FramePipeline, FrameTarget, PipelineConfig, RenderHooks, Scheduler, SimulationHooks,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct Renderer {
    presented: Mutex<Vec<FrameTarget>>,
    snapshots: AtomicUsize,
    /// Panic inside the snapshot job.
    fail_snapshots: bool,
    /// Panic on the render thread when presenting this frame.
    fail_present_at: Option<u64>,
    minimized: AtomicBool,
}

impl RenderHooks for Renderer {
    fn surface_is_empty(&self) -> bool {
        self.minimized.load(Ordering::SeqCst)
    }

    fn snapshot_scene(&self, _target: FrameTarget) {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        if self.fail_snapshots {
            panic!("snapshot failed");
        }
    }

    fn record_commands(&self, _target: FrameTarget) {}

    fn submit_and_present(&self, target: FrameTarget) {
        if self.fail_present_at == Some(target.frame) {
            panic!("device lost");
        }
        self.presented.lock().push(target);
    }
}

/// Minimizes the window between two ticks.
struct Window {
    renderer: Arc<Renderer>,
    ticks: AtomicU64,
    minimized_between: (u64, u64),
    gui_frames: Mutex<Vec<u64>>,
}

impl SimulationHooks for Window {
    fn render_gui(&self, target: FrameTarget) {
        self.gui_frames.lock().push(target.frame);
    }

    fn poll_events(&self) -> bool {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let (from, to) = self.minimized_between;
        self.renderer
            .minimized
            .store((from..to).contains(&tick), Ordering::SeqCst);
        true
    }
}

struct Idle;

impl SimulationHooks for Idle {}

#[test]
fn test_presents_every_frame_in_order() {
    let scheduler = Arc::new(Scheduler::new(2).unwrap());
    let renderer = Arc::new(Renderer::default());
    let pipeline =
        FramePipeline::new(scheduler, PipelineConfig::default(), Arc::new(Idle), renderer.clone())
            .unwrap();

    let stats = pipeline.run(Some(30)).unwrap();
    assert_eq!(stats.frames, 30);

    let presented = renderer.presented.lock();
    let frames: Vec<_> = presented.iter().map(|t| t.frame).collect();
    assert_eq!(frames, (0..30).collect::<Vec<_>>());
    assert!(presented.iter().all(|t| t.slot == (t.frame % 3) as usize));
}

#[test]
fn test_minimized_ticks_skip_gui_and_present() {
    let scheduler = Arc::new(Scheduler::new(2).unwrap());
    let renderer = Arc::new(Renderer::default());
    let window = Arc::new(Window {
        renderer: renderer.clone(),
        ticks: AtomicU64::new(0),
        minimized_between: (3, 6),
        gui_frames: Mutex::new(Vec::new()),
    });

    let pipeline =
        FramePipeline::new(scheduler, PipelineConfig::default(), window.clone(), renderer.clone())
            .unwrap();
    let stats = pipeline.run(Some(10)).unwrap();

    assert_eq!(stats.frames, 10);
    assert_eq!(stats.minimized_frames, 3);
    // Snapshot jobs keep running while minimized.
    assert_eq!(renderer.snapshots.load(Ordering::SeqCst), 10);
    assert_eq!(renderer.presented.lock().len(), 7);
    assert_eq!(window.gui_frames.lock().len(), 7);
}

#[test]
fn test_panicking_snapshot_job_does_not_stall_pipeline() {
    let scheduler = Arc::new(Scheduler::new(2).unwrap());
    let renderer = Arc::new(Renderer {
        fail_snapshots: true,
        ..Default::default()
    });
    let pipeline = FramePipeline::new(
        scheduler.clone(),
        PipelineConfig::default(),
        Arc::new(Idle),
        renderer.clone(),
    )
    .unwrap();

    let stats = pipeline.run(Some(8)).unwrap();
    assert_eq!(stats.frames, 8);
    assert_eq!(renderer.presented.lock().len(), 8);
    assert_eq!(scheduler.metrics().jobs_panicked, 8);
}

#[test]
fn test_render_thread_panic_releases_simulation() {
    let scheduler = Arc::new(Scheduler::new(2).unwrap());
    let renderer = Arc::new(Renderer {
        fail_present_at: Some(4),
        ..Default::default()
    });
    let pipeline =
        FramePipeline::new(scheduler, PipelineConfig::default(), Arc::new(Idle), renderer)
            .unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(pipeline.run(None));
    });

    let result = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("simulation thread deadlocked after render thread panic");
    assert!(matches!(result, Err(Error::RenderThreadPanicked)));
}

#[test]
fn test_small_image_counts_make_progress() {
    for image_count in 1..=4 {
        let scheduler = Arc::new(Scheduler::new(2).unwrap());
        let renderer = Arc::new(Renderer::default());
        let config = PipelineConfig {
            image_count,
            ..PipelineConfig::default()
        };
        let pipeline =
            FramePipeline::new(scheduler, config, Arc::new(Idle), renderer.clone()).unwrap();

        let stats = pipeline.run(Some(12)).unwrap();
        assert_eq!(stats.frames, 12, "image_count = {image_count}");
        assert_eq!(renderer.presented.lock().len(), 12);
    }
}

#[test]
fn test_zero_image_count_rejected() {
    let scheduler = Arc::new(Scheduler::new(1).unwrap());
    let config = PipelineConfig {
        image_count: 0,
        ..PipelineConfig::default()
    };
    let result = FramePipeline::new(scheduler, config, Arc::new(Idle), Arc::new(Renderer::default()));
    assert!(matches!(result, Err(Error::InvalidImageCount(0))));
}
