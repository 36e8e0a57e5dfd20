use crate::queue::DelayQueue;
use crate::sync::{thread, Arc, AtomicBool, Ordering};
use core::time::Duration;
use derive_more::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error};

/// A unit of work accepted by the pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// How a repeating submission spaces out executions of the user job.
///
/// The two strategies differ in whether the first user-job execution is
/// immediate or delayed: `Periodic` re-arms the timer before running the job,
/// `Interval` runs the job and only then re-arms, so the gap between two
/// executions additionally includes the job's own duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStrategy {
    /// Re-submit with the period first, then run the user job.
    Periodic,
    /// Run the user job first, then re-submit with the period.
    Interval,
}

/// Fixed set of worker threads pulling runnable jobs from a [`DelayQueue`].
///
/// Workers wait on the queue with a short bounded timeout rather than a
/// purely event-driven wait: the queue must release threads both when new
/// work arrives and when a previously-future element becomes due, and the
/// latter is a time-based wake. The bounded wait subsumes both, and also
/// keeps shutdown latency within roughly one poll interval.
///
/// Dropping the pool stops the workers and joins them. Jobs already popped
/// run to completion; jobs still in the queue are discarded.
#[derive(Debug)]
#[must_use]
pub struct WorkerPool {
    queue: Arc<DelayQueue<Job>>,
    running: Arc<AtomicBool>,
    #[debug(skip)]
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates a pool with `threads` workers and a 1 ms poll interval.
    pub fn new(threads: usize) -> Self {
        Self::with_poll_interval(threads, Duration::from_millis(1))
    }

    /// Creates a pool with `threads` workers waiting up to `poll_interval`
    /// per queue take.
    pub fn with_poll_interval(threads: usize, poll_interval: Duration) -> Self {
        let queue = Arc::new(DelayQueue::new());
        let running = Arc::new(AtomicBool::new(true));
        debug!(threads, ?poll_interval, "starting worker pool");
        let workers = (0..threads)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let running = Arc::clone(&running);
                thread::spawn(move || worker_loop(&queue, &running, poll_interval))
            })
            .collect();
        Self {
            queue,
            running,
            workers,
        }
    }

    /// Enqueues a job with zero delay.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.queue.push(Box::new(job), Duration::ZERO);
    }

    /// Enqueues a job that becomes runnable after `delay`.
    pub fn submit_delayed(&self, job: impl FnOnce() + Send + 'static, delay: Duration) {
        self.queue.push(Box::new(job), delay);
    }

    /// Enqueues a job that re-submits itself with `period` delay on every
    /// firing.
    ///
    /// With `delayed_start` false the first execution happens immediately,
    /// on the calling thread; every subsequent execution happens on a worker.
    /// The repetition only stops when the pool shuts down.
    pub fn submit_repeatable(
        &self,
        job: impl Fn() + Send + Sync + 'static,
        period: Duration,
        strategy: RepeatStrategy,
        delayed_start: bool,
    ) {
        submit_repeating(&self.queue, Arc::new(job), period, strategy, delayed_start);
    }

    /// [`submit_repeatable`](Self::submit_repeatable) with
    /// [`RepeatStrategy::Periodic`].
    pub fn submit_periodic(
        &self,
        job: impl Fn() + Send + Sync + 'static,
        period: Duration,
        delayed_start: bool,
    ) {
        self.submit_repeatable(job, period, RepeatStrategy::Periodic, delayed_start);
    }

    /// [`submit_repeatable`](Self::submit_repeatable) with
    /// [`RepeatStrategy::Interval`].
    pub fn submit_interval(
        &self,
        job: impl Fn() + Send + Sync + 'static,
        period: Duration,
        delayed_start: bool,
    ) {
        self.submit_repeatable(job, period, RepeatStrategy::Interval, delayed_start);
    }

    /// Number of jobs currently waiting in the queue.
    #[must_use]
    pub fn queued_jobs(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn queue(&self) -> &Arc<DelayQueue<Job>> {
        &self.queue
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        debug!("stopping worker pool");
        self.running.store(false, Ordering::Relaxed);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn submit_repeating(
    queue: &Arc<DelayQueue<Job>>,
    job: Arc<dyn Fn() + Send + Sync>,
    period: Duration,
    strategy: RepeatStrategy,
    delayed_start: bool,
) {
    let rearm: Job = Box::new({
        let queue = Arc::clone(queue);
        let job = Arc::clone(&job);
        move || submit_repeating(&queue, job, period, strategy, false)
    });
    match strategy {
        RepeatStrategy::Periodic => {
            queue.push(rearm, period);
            if !delayed_start {
                job();
            }
        }
        RepeatStrategy::Interval => {
            if !delayed_start {
                job();
            }
            queue.push(rearm, period);
        }
    }
}

fn worker_loop(queue: &DelayQueue<Job>, running: &AtomicBool, poll_interval: Duration) {
    while running.load(Ordering::Relaxed) {
        if let Some(job) = queue.pop_wait(poll_interval) {
            // Keep the worker alive whatever the job does; graph jobs catch
            // their own failures, raw submissions may not.
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!("worker job panicked");
            }
        }
    }
}
