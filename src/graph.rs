use crate::config::GraphConfig;
use crate::error::GraphError;
use crate::fold::{FoldHandle, FoldMode, FoldNode, WireFold};
use crate::node::{InputHandle, Inputs, Node, NodeFn, NodeHandle, RunnableNode, Wire};
use crate::pool::{Job, WorkerPool};
use crate::queue::DelayQueue;
use crate::sync::{Arc, AtomicUsize, Condvar, Mutex, MutexGuard, Ordering};
use crate::types::{IndexSet, NodeId};
use crate::utils::panic_message;
use core::time::Duration;
use derive_more::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, trace};

/// Owner and scheduler of a computational DAG.
///
/// A graph is built by adding nodes, connecting producer outputs to consumer
/// input slots, and setting the values of zero-input (input) nodes. On
/// [`run`](Self::run) every input node executes on the caller's thread;
/// completion then propagates through the DAG, with every other node
/// executing on a worker thread as soon as all of its inputs have been
/// produced. `run` returns once every node has run, or once a failure has
/// been recorded.
///
/// Nodes are owned by the graph for the graph's whole lifetime; handles
/// returned from the `add_*` methods stay valid as long as the graph lives.
#[derive(Debug)]
#[must_use]
pub struct Graph {
    inner: Arc<GraphInner>,
    pool: WorkerPool,
}

#[derive(Debug)]
struct GraphInner {
    #[debug(skip)]
    nodes: Mutex<Vec<Arc<dyn RunnableNode>>>,
    #[debug(skip)]
    input_ids: Mutex<IndexSet<NodeId>>,
    run: RunState,
}

/// Per-run scheduling metadata.
#[derive(Debug)]
struct RunState {
    /// One flag per node, flipped false to true exactly once per run, under
    /// the lock. The flip is the linearization point for scheduling a node.
    #[debug(skip)]
    scheduled: Mutex<Vec<bool>>,
    /// Number of nodes whose run has fully returned.
    completed: AtomicUsize,
    total: AtomicUsize,
    /// Distinguishes jobs of the current run from stragglers of a previous,
    /// failed run that were still sitting in the queue.
    generation: AtomicUsize,
    #[debug(skip)]
    done: Mutex<()>,
    #[debug(skip)]
    all_completed: Condvar,
    #[debug(skip)]
    error: Mutex<Option<GraphError>>,
}

impl RunState {
    fn new() -> Self {
        Self {
            scheduled: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            generation: AtomicUsize::new(0),
            done: Mutex::new(()),
            all_completed: Condvar::new(),
            error: Mutex::new(None),
        }
    }

    fn has_error(&self) -> bool {
        self.error.lock().expect("RunState::has_error: poisoned").is_some()
    }
}

impl Graph {
    /// Creates a graph executing on `worker_threads` pool threads.
    pub fn new(worker_threads: usize) -> Self {
        Self::with_config(GraphConfig {
            worker_threads,
            ..GraphConfig::default()
        })
    }

    /// Creates a graph from a full [`GraphConfig`].
    pub fn with_config(config: GraphConfig) -> Self {
        let pool = WorkerPool::with_poll_interval(config.worker_threads, config.poll_interval);
        Self {
            inner: Arc::new(GraphInner {
                nodes: Mutex::new(Vec::new()),
                input_ids: Mutex::new(IndexSet::default()),
                run: RunState::new(),
            }),
            pool,
        }
    }

    /// Registers a zero-input node whose value is supplied via
    /// [`set_input`](Self::set_input).
    pub fn add_input<T>(&mut self) -> InputHandle<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut nodes = self.lock_nodes();
        let id = NodeId(nodes.len());
        let node = Arc::new(Node::<T, ()>::new(id));
        nodes.push(Arc::clone(&node) as Arc<dyn RunnableNode>);
        drop(nodes);
        self.inner
            .input_ids
            .lock()
            .expect("Graph::add_input: poisoned")
            .insert(id);
        NodeHandle::from_arc(node)
    }

    /// Registers a transform node computing `function` over the outputs of
    /// `producers`.
    ///
    /// `producers` is a tuple of handle references matching the function's
    /// parameter types positionally; arity or type mismatches are compile
    /// errors. Every non-input node must be reachable from an input node,
    /// otherwise nothing ever triggers it and `run` will not terminate.
    pub fn add_node<O, I, F, P>(&mut self, function: F, producers: P) -> NodeHandle<O, I>
    where
        O: Clone + Send + Sync + 'static,
        I: Inputs,
        F: NodeFn<I, O>,
        P: Wire<I>,
    {
        let mut nodes = self.lock_nodes();
        let id = NodeId(nodes.len());
        let node = Arc::new(Node::with_function(id, function));
        nodes.push(Arc::clone(&node) as Arc<dyn RunnableNode>);
        drop(nodes);
        let handle = NodeHandle::from_arc(node);
        producers
            .wire(&handle)
            .expect("Graph::add_node: fresh slots cannot be wired twice");
        handle
    }

    /// Registers a fold node aggregating the outputs of `producers` with
    /// `combine`, starting from `initial`.
    ///
    /// Each producer may yield either a single `A` or a `Vec<A>` batch.
    pub fn add_fold<O, A, F, P>(
        &mut self,
        mode: FoldMode,
        combine: F,
        initial: O,
        producers: P,
    ) -> FoldHandle<O, A>
    where
        O: Clone + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
        F: Fn(O, &A) -> O + Send + Sync + 'static,
        P: WireFold<O, A>,
    {
        let mut nodes = self.lock_nodes();
        let id = NodeId(nodes.len());
        let fold = Arc::new(FoldNode::new(id, mode, combine, initial));
        nodes.push(Arc::clone(&fold) as Arc<dyn RunnableNode>);
        drop(nodes);
        let handle = FoldHandle::from_arc(fold);
        producers.wire(&handle);
        handle
    }

    /// Sets the value of the input node `id`: its function becomes a
    /// constant returning `value`.
    ///
    /// # Errors
    /// [`GraphError::InvalidNodeId`] if `id` is not registered,
    /// [`GraphError::BadInputType`] if the node is not a zero-input node of
    /// output type `T`. The graph state is unchanged on error.
    pub fn set_input<T>(&mut self, id: NodeId, value: T) -> Result<(), GraphError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let nodes = self.lock_nodes();
        let node = nodes
            .get(id.index())
            .ok_or(GraphError::InvalidNodeId { node: id })?;
        let node = node
            .as_any()
            .downcast_ref::<Node<T, ()>>()
            .ok_or(GraphError::BadInputType { node: id })?;
        node.set_function(move || value.clone());
        Ok(())
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_nodes().len()
    }

    /// Whether the graph holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Executes the graph and blocks until every node has run.
    ///
    /// Input nodes execute on the calling thread first, priming downstream
    /// slots through their callbacks; everything else is dispatched onto the
    /// worker pool as it becomes ready. Each node runs at most once per
    /// invocation; the order of independent nodes is unspecified.
    ///
    /// # Errors
    /// The first failure recorded during the run: a panic in a user function
    /// ([`GraphError::UserFunction`]), an input node without a value
    /// ([`GraphError::FunctionNotSet`]), or an internal readiness violation
    /// ([`GraphError::NotReady`]). After a failure, remaining nodes are
    /// treated as completed and no further nodes are scheduled, though jobs
    /// already dequeued may still finish.
    pub fn run(&self) -> Result<(), GraphError> {
        let nodes: Arc<[Arc<dyn RunnableNode>]> = self.lock_nodes().clone().into();
        let total = nodes.len();
        let run = &self.inner.run;

        // Bump the generation before any other reset: a straggler job from a
        // previous failed run must fail its generation check rather than
        // observe half-reset state.
        let generation = run.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *run.scheduled.lock().expect("Graph::run: poisoned") = vec![false; total];
        run.completed.store(0, Ordering::SeqCst);
        run.total.store(total, Ordering::SeqCst);
        *run.error.lock().expect("Graph::run: poisoned") = None;

        let input_ids: Vec<NodeId> = self
            .inner
            .input_ids
            .lock()
            .expect("Graph::run: poisoned")
            .iter()
            .copied()
            .collect();
        debug!(nodes = total, inputs = input_ids.len(), "starting graph run");

        let queue = Arc::clone(self.pool.queue());

        // Input nodes run on the caller's thread so that their callbacks
        // have primed downstream slots before any readiness check happens.
        let mut seeded = Vec::with_capacity(input_ids.len());
        for &id in &input_ids {
            run.scheduled.lock().expect("Graph::run: poisoned")[id.index()] = true;
            match run_node_guarded(&nodes[id.index()]) {
                Ok(()) => seeded.push(id),
                Err(failure) => {
                    fail(run, failure);
                    break;
                }
            }
        }

        for &id in &seeded {
            if run.has_error() {
                break;
            }
            on_complete(&self.inner, &nodes, &queue, id, generation);
        }

        let mut done = run.done.lock().expect("Graph::run: poisoned");
        while run.completed.load(Ordering::SeqCst) < total {
            done = run
                .all_completed
                .wait(done)
                .expect("Graph::run: completion wait poisoned");
        }
        drop(done);

        let failure = run.error.lock().expect("Graph::run: poisoned").clone();
        match failure {
            Some(failure) => {
                error!(%failure, "graph run failed");
                Err(failure)
            }
            None => {
                debug!("graph run complete");
                Ok(())
            }
        }
    }

    fn lock_nodes(&self) -> MutexGuard<'_, Vec<Arc<dyn RunnableNode>>> {
        self.inner
            .nodes
            .lock()
            .expect("Graph: node table poisoned")
    }
}

/// Propagates a node's completion: schedules every now-ready consumer and
/// advances the quiescence counter.
fn on_complete(
    inner: &Arc<GraphInner>,
    nodes: &Arc<[Arc<dyn RunnableNode>]>,
    queue: &Arc<DelayQueue<Job>>,
    completed: NodeId,
    generation: usize,
) {
    let run = &inner.run;
    for child in nodes[completed.index()].output_ids() {
        if run.has_error() {
            break;
        }
        // The outputs multiset is iterated after the producer's result
        // exists, so the child may already be ready here. A child with
        // multiple edges from the same producer appears multiple times; the
        // scheduled flag still admits it exactly once.
        if !nodes[child.index()].is_ready() {
            continue;
        }
        let mut scheduled = run.scheduled.lock().expect("on_complete: poisoned");
        if scheduled[child.index()] {
            continue;
        }
        scheduled[child.index()] = true;
        trace!(node = %child, from = %completed, "scheduling node");
        let job: Job = Box::new({
            let inner = Arc::clone(inner);
            let nodes = Arc::clone(nodes);
            let queue = Arc::clone(queue);
            move || run_scheduled(&inner, &nodes, &queue, child, generation)
        });
        // Submit while still holding the scheduler lock: a second producer
        // must not observe the flag flipped before the job exists.
        queue.push(job, Duration::ZERO);
        drop(scheduled);
    }

    let completed_now = run.completed.fetch_add(1, Ordering::SeqCst) + 1;
    if completed_now >= run.total.load(Ordering::SeqCst) {
        let _done = run.done.lock().expect("on_complete: poisoned");
        run.all_completed.notify_all();
    }
}

/// Worker-side execution of a scheduled node.
fn run_scheduled(
    inner: &Arc<GraphInner>,
    nodes: &Arc<[Arc<dyn RunnableNode>]>,
    queue: &Arc<DelayQueue<Job>>,
    id: NodeId,
    generation: usize,
) {
    let run = &inner.run;
    if run.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    if run.has_error() {
        return;
    }
    match run_node_guarded(&nodes[id.index()]) {
        Ok(()) => on_complete(inner, nodes, queue, id, generation),
        Err(failure) => fail(run, failure),
    }
}

/// Runs a node, converting a user-function panic into an error.
fn run_node_guarded(node: &Arc<dyn RunnableNode>) -> Result<(), GraphError> {
    match catch_unwind(AssertUnwindSafe(|| node.run())) {
        Ok(result) => result,
        Err(payload) => Err(GraphError::UserFunction {
            node: node.id(),
            message: panic_message(payload),
        }),
    }
}

/// Records the run's first failure and releases the driver by treating all
/// remaining nodes as completed.
fn fail(run: &RunState, failure: GraphError) {
    debug!(%failure, "recording run failure");
    {
        let mut slot = run.error.lock().expect("fail: poisoned");
        if slot.is_none() {
            *slot = Some(failure);
        }
    }
    run.completed
        .store(run.total.load(Ordering::SeqCst), Ordering::SeqCst);
    let _done = run.done.lock().expect("fail: poisoned");
    run.all_completed.notify_all();
}
