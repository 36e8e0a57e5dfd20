use core::num::NonZeroUsize;
use core::time::Duration;
use std::thread;

/// Configuration of the execution engine.
///
/// [`Graph::new`](crate::graph::Graph::new) covers the common case of picking
/// a worker count; `GraphConfig` additionally exposes the worker poll
/// interval, which bounds both shutdown latency and the precision with which
/// delayed jobs become runnable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Number of OS threads in the worker pool.
    pub worker_threads: usize,
    /// How long a worker blocks on the job queue before re-checking the
    /// pool's running flag.
    pub poll_interval: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            worker_threads: thread::available_parallelism().map_or(4, NonZeroUsize::get),
            poll_interval: Duration::from_millis(1),
        }
    }
}
