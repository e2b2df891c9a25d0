use framepipe::topology::Topology;
use framepipe::{Counter, JobPriority, PinningStrategy, Scheduler, SchedulerConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn scheduler_with(workers: usize, pinning: PinningStrategy) -> Scheduler {
    Scheduler::with_config(SchedulerConfig {
        worker_threads: Some(workers),
        pinning,
        ..SchedulerConfig::default()
    })
    .unwrap()
}

#[test]
fn test_none_strategy() {
    let scheduler = scheduler_with(4, PinningStrategy::None);
    assert_eq!(scheduler.num_workers(), 4);
    scheduler.shutdown().unwrap();
}

#[test]
fn test_linear_strategy() {
    let scheduler = scheduler_with(2, PinningStrategy::Linear);
    assert_eq!(scheduler.num_workers(), 2);
    scheduler.shutdown().unwrap();
}

#[test]
fn test_avoid_smt_strategy() {
    let scheduler = scheduler_with(2, PinningStrategy::AvoidSMT);
    let counter = Counter::default();
    // The actual affinity is not observable portably; the code path must not fail.
    scheduler.submit_job("pinned", || {}, Some(&counter), JobPriority::Medium, false);
    counter.wait();
    scheduler.shutdown().unwrap();
}

#[test]
fn test_more_workers_than_cores_wraps() {
    let workers = Topology::detect().logical_cores + 4;
    let scheduler = scheduler_with(workers, PinningStrategy::Linear);
    assert_eq!(scheduler.num_workers(), workers);

    let executed = Arc::new(AtomicUsize::new(0));
    let counter = Counter::default();
    for _ in 0..100 {
        let executed = executed.clone();
        scheduler.submit_job(
            "wrap",
            move || {
                executed.fetch_add(1, Ordering::SeqCst);
            },
            Some(&counter),
            JobPriority::Low,
            false,
        );
    }
    counter.wait();
    assert_eq!(executed.load(Ordering::SeqCst), 100);
    scheduler.shutdown().unwrap();
}

#[test]
fn test_reserved_slots_precede_workers() {
    let topo = Topology::detect();
    let config = SchedulerConfig::default();
    if topo.logical_cores <= config.reserved_threads
        || topo.core_for(PinningStrategy::Linear, 0).is_none()
    {
        return;
    }
    // Worker 0 lands on the first core after the simulation and render threads.
    let first_worker = topo.core_for(PinningStrategy::Linear, config.reserved_threads);
    let render = topo.core_for(PinningStrategy::Linear, 1);
    assert_ne!(first_worker.map(|c| c.id), render.map(|c| c.id));
    assert!(topo.core_for(PinningStrategy::None, 0).is_none());
}
