#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use pcg::{
    pool::{RepeatStrategy, WorkerPool},
    queue::DelayQueue,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn delayed_element_waits_for_a_later_immediate_one() {
    // Push J1 with a long delay, then J2 with none: J2 must come out first,
    // J1 only once its ready-time has passed.
    let queue = DelayQueue::new();
    queue.push("j1", Duration::from_millis(400));
    thread::sleep(Duration::from_millis(50));
    queue.push("j2", Duration::ZERO);

    let started = Instant::now();
    assert_eq!(queue.pop_wait(Duration::from_secs(5)), Some("j2"));
    let first = started.elapsed();
    assert_eq!(queue.pop_wait(Duration::from_secs(5)), Some("j1"));
    let second = started.elapsed();

    assert!(first < Duration::from_millis(200), "j2 was due immediately");
    assert!(
        second >= Duration::from_millis(300),
        "j1 delivered {second:?} after its push, before its delay elapsed"
    );
    assert!(queue.is_empty());
}

#[test]
fn nothing_is_delivered_before_its_ready_time() {
    let queue = Arc::new(DelayQueue::new());
    let mut expected = Vec::new();
    for (index, delay_ms) in [120u64, 40, 0, 80, 20].into_iter().enumerate() {
        let delay = Duration::from_millis(delay_ms);
        expected.push((index, Instant::now() + delay));
        queue.push(index, delay);
    }

    while let Some(index) = queue.pop_wait(Duration::from_secs(1)) {
        let (_, ready_at) = expected[index];
        assert!(
            Instant::now() >= ready_at,
            "element {index} delivered before its ready-time"
        );
    }
    assert!(queue.is_empty());
}

#[test]
fn pop_is_non_blocking() {
    let queue = DelayQueue::new();
    assert_eq!(queue.pop(), None);

    queue.push(1, Duration::from_secs(60));
    // Still in the future.
    assert_eq!(queue.pop(), None);
    assert_eq!(queue.len(), 1);

    queue.push(2, Duration::ZERO);
    assert_eq!(queue.pop(), Some(2));
}

#[test]
fn pop_wait_times_out_on_an_empty_queue() {
    let queue: DelayQueue<u32> = DelayQueue::new();
    let started = Instant::now();
    assert_eq!(queue.pop_wait(Duration::from_millis(50)), None);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(40));
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn an_earlier_push_wakes_a_parked_waiter() {
    let queue = Arc::new(DelayQueue::new());
    queue.push("late", Duration::from_secs(30));

    let waiter = thread::spawn({
        let queue = Arc::clone(&queue);
        move || queue.pop_wait(Duration::from_secs(10))
    });
    // Give the waiter time to park against the 30 s head.
    thread::sleep(Duration::from_millis(100));
    queue.push("early", Duration::ZERO);

    assert_eq!(waiter.join().unwrap(), Some("early"));
}

#[test]
fn submitted_jobs_execute() {
    let counter = Arc::new(AtomicUsize::new(0));
    let pool = WorkerPool::new(4);
    for _ in 0..64 {
        let counter = Arc::clone(&counter);
        pool.submit(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }
    drop(pool);
    assert_eq!(counter.load(Ordering::Relaxed), 64);
}

#[test]
fn delayed_jobs_run_after_their_delay() {
    let pool = WorkerPool::new(2);
    let fired = Arc::new(AtomicUsize::new(0));
    let submitted = Instant::now();
    let observed = Arc::new(std::sync::Mutex::new(None));

    pool.submit_delayed(
        {
            let fired = Arc::clone(&fired);
            let observed = Arc::clone(&observed);
            move || {
                fired.fetch_add(1, Ordering::Relaxed);
                *observed.lock().unwrap() = Some(submitted.elapsed());
            }
        },
        Duration::from_millis(150),
    );

    assert_eq!(fired.load(Ordering::Relaxed), 0);
    thread::sleep(Duration::from_millis(400));
    assert_eq!(fired.load(Ordering::Relaxed), 1);
    let elapsed = observed.lock().unwrap().expect("job ran");
    assert!(elapsed >= Duration::from_millis(150));
}

#[test]
fn periodic_strategy_runs_immediately_unless_delayed() {
    let pool = WorkerPool::new(2);
    let count = Arc::new(AtomicUsize::new(0));
    pool.submit_repeatable(
        {
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::Relaxed);
            }
        },
        Duration::from_millis(100),
        RepeatStrategy::Periodic,
        false,
    );
    // The first execution happens on the submitting thread, immediately.
    assert!(count.load(Ordering::Relaxed) >= 1);

    thread::sleep(Duration::from_millis(350));
    let seen = count.load(Ordering::Relaxed);
    assert!(seen >= 2, "expected repeated firings, saw {seen}");
    drop(pool);
}

#[test]
fn delayed_start_skips_the_immediate_execution() {
    let pool = WorkerPool::new(2);
    let count = Arc::new(AtomicUsize::new(0));
    pool.submit_repeatable(
        {
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::Relaxed);
            }
        },
        Duration::from_millis(100),
        RepeatStrategy::Interval,
        true,
    );
    assert_eq!(count.load(Ordering::Relaxed), 0);

    thread::sleep(Duration::from_millis(350));
    assert!(count.load(Ordering::Relaxed) >= 1);
    drop(pool);
}

#[test]
fn shutdown_is_bounded_by_the_poll_interval_and_running_jobs() {
    let pool = WorkerPool::with_poll_interval(4, Duration::from_millis(1));
    let finished = Arc::new(AtomicUsize::new(0));
    pool.submit({
        let finished = Arc::clone(&finished);
        move || {
            thread::sleep(Duration::from_millis(100));
            finished.fetch_add(1, Ordering::Relaxed);
        }
    });
    // Let a worker pick the job up before tearing down.
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    drop(pool);
    let elapsed = started.elapsed();

    // The popped job ran to completion and teardown did not hang.
    assert_eq!(finished.load(Ordering::Relaxed), 1);
    assert!(elapsed < Duration::from_secs(2), "shutdown took {elapsed:?}");
}

#[test]
fn queued_jobs_are_discarded_on_shutdown() {
    let pool = WorkerPool::new(1);
    let fired = Arc::new(AtomicUsize::new(0));
    pool.submit_delayed(
        {
            let fired = Arc::clone(&fired);
            move || {
                fired.fetch_add(1, Ordering::Relaxed);
            }
        },
        Duration::from_secs(60),
    );
    assert_eq!(pool.queued_jobs(), 1);
    drop(pool);
    assert_eq!(fired.load(Ordering::Relaxed), 0);
}
