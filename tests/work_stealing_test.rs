use crossbeam::deque::{Steal, Worker};
use framepipe::{Counter, JobPriority, Scheduler};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[test]
fn test_deque_ordering_lifo_local() {
    // Owner pops the most recently pushed job first.
    let w = Worker::<i32>::new_lifo();
    w.push(1);
    w.push(2);
    w.push(3);

    assert_eq!(w.pop(), Some(3));
    assert_eq!(w.pop(), Some(2));
    assert_eq!(w.pop(), Some(1));
    assert_eq!(w.pop(), None);
}

#[test]
fn test_deque_ordering_fifo_steal() {
    // Thieves take the oldest job from the opposite end.
    let w = Worker::<i32>::new_lifo();
    w.push(1);
    w.push(2);
    w.push(3);

    let s = w.stealer();
    assert_eq!(s.steal(), Steal::Success(1));
    assert_eq!(s.steal(), Steal::Success(2));
    assert_eq!(s.steal(), Steal::Success(3));
    assert_eq!(s.steal(), Steal::Empty);
}

#[test]
fn test_concurrent_thieves_take_each_item_once() {
    let w = Worker::<usize>::new_lifo();
    let n = 10_000;
    for i in 0..n {
        w.push(i);
    }

    let seen: Arc<Vec<AtomicUsize>> = Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect());
    let thieves: Vec<_> = (0..4)
        .map(|_| {
            let stealer = w.stealer();
            let seen = seen.clone();
            std::thread::spawn(move || {
                loop {
                    match stealer.steal() {
                        Steal::Success(i) => {
                            seen[i].fetch_add(1, Ordering::SeqCst);
                        }
                        Steal::Retry => continue,
                        Steal::Empty => break,
                    }
                }
            })
        })
        .collect();

    // The owner keeps popping from its own end while thieves steal.
    while let Some(i) = w.pop() {
        seen[i].fetch_add(1, Ordering::SeqCst);
    }
    for thief in thieves {
        thief.join().unwrap();
    }

    assert!(seen.iter().all(|count| count.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_nested_spawns_with_random_durations() {
    let scheduler = Arc::new(Scheduler::new(4).unwrap());
    let parents = 16;
    let children = 32;
    let runs: Arc<Vec<AtomicUsize>> =
        Arc::new((0..parents * children).map(|_| AtomicUsize::new(0)).collect());
    let counter = Counter::default();

    let mut rng = rand::rng();
    for p in 0..parents {
        let delays: Vec<u64> = (0..children).map(|_| rng.random_range(0..200)).collect();
        let inner = scheduler.clone();
        let runs = runs.clone();
        let done = counter.clone();
        scheduler.submit_job(
            format!("parent-{p}"),
            move || {
                for (c, micros) in delays.into_iter().enumerate() {
                    let runs = runs.clone();
                    inner.spawn_local(
                        "child",
                        move || {
                            std::thread::sleep(Duration::from_micros(micros));
                            runs[p * children + c].fetch_add(1, Ordering::SeqCst);
                        },
                        Some(&done),
                        JobPriority::Medium,
                        false,
                    );
                }
            },
            Some(&counter),
            JobPriority::High,
            false,
        );
    }

    counter.wait();
    for (i, run) in runs.iter().enumerate() {
        assert_eq!(run.load(Ordering::SeqCst), 1, "job {i} ran {} times", run.load(Ordering::SeqCst));
    }
    scheduler.finish_jobs();
    let metrics = scheduler.metrics();
    assert_eq!(metrics.jobs_completed, (parents + parents * children) as u64);
    assert_eq!(
        metrics.local_queue_pops + metrics.global_queue_pops + metrics.worker_steals_success,
        metrics.jobs_completed
    );
}
