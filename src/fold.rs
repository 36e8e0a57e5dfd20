use crate::error::GraphError;
use crate::node::{DeliveryFn, Producer, RunnableNode};
use crate::sync::{Arc, AtomicUsize, Mutex, Ordering};
use crate::types::NodeId;
use core::any::Any;
use derive_more::Debug;

/// When a fold node applies its combine function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldMode {
    /// Each delivered value is combined into a running accumulator
    /// immediately, on the delivering producer's thread. The observed
    /// combination order is the order in which producers happen to finish,
    /// which is nondeterministic across runs.
    Streaming,
    /// Each delivered value is appended to a buffer; the node's own run
    /// folds the buffer in delivery order starting from the initial value.
    Batched,
}

enum FoldState<O, A> {
    Streaming { acc: Mutex<Option<O>> },
    Batched { buffer: Mutex<Vec<A>> },
}

/// A node that aggregates values arriving from one or more producers into a
/// single accumulator.
///
/// Unlike a plain [`Node`](crate::node::Node), a fold node's arity is
/// dynamic: every [`connect_fold`] call increments the declared-input count,
/// and every producer firing increments the ready count after its value(s)
/// have been applied. The node is ready exactly when the two counts are
/// equal; the declared count is fixed by the time the graph run starts.
#[derive(Debug)]
#[must_use]
pub struct FoldNode<O, A> {
    id: NodeId,
    mode: FoldMode,
    #[debug(skip)]
    combine: Box<dyn Fn(O, &A) -> O + Send + Sync>,
    #[debug(skip)]
    initial: O,
    #[debug(skip)]
    state: FoldState<O, A>,
    inputs_declared: AtomicUsize,
    inputs_ready: AtomicUsize,
    #[debug(skip)]
    result: Mutex<Option<O>>,
    #[debug(skip)]
    out: Mutex<FoldEdges<O>>,
}

struct FoldEdges<O> {
    callbacks: Vec<DeliveryFn<O>>,
    consumers: Vec<NodeId>,
}

impl<O, A> FoldNode<O, A>
where
    O: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        id: NodeId,
        mode: FoldMode,
        combine: impl Fn(O, &A) -> O + Send + Sync + 'static,
        initial: O,
    ) -> Self {
        let state = match mode {
            FoldMode::Streaming => FoldState::Streaming {
                acc: Mutex::new(Some(initial.clone())),
            },
            FoldMode::Batched => FoldState::Batched {
                buffer: Mutex::new(Vec::new()),
            },
        };
        Self {
            id,
            mode,
            combine: Box::new(combine),
            initial,
            state,
            inputs_declared: AtomicUsize::new(0),
            inputs_ready: AtomicUsize::new(0),
            result: Mutex::new(None),
            out: Mutex::new(FoldEdges {
                callbacks: Vec::new(),
                consumers: Vec::new(),
            }),
        }
    }

    /// Id assigned at registration time.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The mode chosen at construction.
    #[must_use]
    pub fn mode(&self) -> FoldMode {
        self.mode
    }

    /// Whether every declared producer has delivered.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inputs_ready.load(Ordering::Acquire) == self.inputs_declared.load(Ordering::Acquire)
    }

    /// The accumulated result after a run, `None` otherwise.
    #[must_use]
    pub fn result(&self) -> Option<O> {
        self.result.lock().expect("FoldNode::result: poisoned").clone()
    }

    /// Publishes the accumulator as the node's result and fires outbound
    /// callbacks.
    ///
    /// In batched mode this is where the buffered values are folded, in
    /// delivery order, starting from the initial value.
    ///
    /// # Errors
    /// [`GraphError::NotReady`] if some declared producer has not delivered.
    pub fn run(&self) -> Result<(), GraphError> {
        if !self.is_ready() {
            return Err(GraphError::NotReady { node: self.id });
        }
        let output = match &self.state {
            FoldState::Streaming { acc } => acc
                .lock()
                .expect("FoldNode::run: accumulator poisoned")
                .clone()
                .expect("FoldNode::run: accumulator taken"),
            FoldState::Batched { buffer } => {
                let buffer = buffer.lock().expect("FoldNode::run: buffer poisoned");
                let mut acc = self.initial.clone();
                for value in buffer.iter() {
                    acc = (self.combine)(acc, value);
                }
                acc
            }
        };
        *self.result.lock().expect("FoldNode::run: result poisoned") = Some(output.clone());
        let out = self.out.lock().expect("FoldNode::run: edges poisoned");
        for callback in &out.callbacks {
            callback(&output);
        }
        Ok(())
    }

    /// Registers an observer invoked with the output right after this node
    /// computes.
    pub fn on_computed(&self, callback: impl Fn(&O) + Send + Sync + 'static) {
        self.out
            .lock()
            .expect("FoldNode::on_computed: poisoned")
            .callbacks
            .push(Box::new(callback));
    }

    pub(crate) fn declare_input(&self) {
        self.inputs_declared.fetch_add(1, Ordering::AcqRel);
    }

    /// Applies a single delivered value. Safe to call from any producer
    /// thread; the ready count rises only after the value has been applied.
    pub(crate) fn deliver_one(&self, value: A) {
        match &self.state {
            FoldState::Streaming { acc } => {
                let mut acc = acc.lock().expect("FoldNode::deliver_one: poisoned");
                let current = acc.take().expect("FoldNode::deliver_one: accumulator taken");
                *acc = Some((self.combine)(current, &value));
            }
            FoldState::Batched { buffer } => {
                buffer
                    .lock()
                    .expect("FoldNode::deliver_one: poisoned")
                    .push(value);
            }
        }
        self.inputs_ready.fetch_add(1, Ordering::Release);
    }

    /// Applies a delivered batch. All elements are combined/appended
    /// atomically with respect to other producers' deliveries; the firing
    /// still counts as a single ready increment.
    pub(crate) fn deliver_batch(&self, values: &[A]) {
        match &self.state {
            FoldState::Streaming { acc } => {
                let mut acc = acc.lock().expect("FoldNode::deliver_batch: poisoned");
                let mut current = acc.take().expect("FoldNode::deliver_batch: accumulator taken");
                for value in values {
                    current = (self.combine)(current, value);
                }
                *acc = Some(current);
            }
            FoldState::Batched { buffer } => {
                buffer
                    .lock()
                    .expect("FoldNode::deliver_batch: poisoned")
                    .extend_from_slice(values);
            }
        }
        self.inputs_ready.fetch_add(1, Ordering::Release);
    }

    fn add_edge(&self, consumer: NodeId, deliver: DeliveryFn<O>) {
        let mut out = self.out.lock().expect("FoldNode::add_edge: poisoned");
        out.callbacks.push(deliver);
        out.consumers.push(consumer);
    }
}

impl<O, A> RunnableNode for FoldNode<O, A>
where
    O: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn is_ready(&self) -> bool {
        FoldNode::is_ready(self)
    }

    fn run(&self) -> Result<(), GraphError> {
        FoldNode::run(self)
    }

    fn output_ids(&self) -> Vec<NodeId> {
        self.out
            .lock()
            .expect("FoldNode::output_ids: poisoned")
            .consumers
            .clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shared handle to a fold node.
#[derive(Debug)]
#[must_use]
pub struct FoldHandle<O, A> {
    fold: Arc<FoldNode<O, A>>,
}

impl<O, A> Clone for FoldHandle<O, A> {
    fn clone(&self) -> Self {
        Self {
            fold: Arc::clone(&self.fold),
        }
    }
}

impl<O, A> FoldHandle<O, A>
where
    O: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// Creates a detached fold node with the given id.
    pub fn new(
        id: NodeId,
        mode: FoldMode,
        combine: impl Fn(O, &A) -> O + Send + Sync + 'static,
        initial: O,
    ) -> Self {
        Self {
            fold: Arc::new(FoldNode::new(id, mode, combine, initial)),
        }
    }

    pub(crate) fn from_arc(fold: Arc<FoldNode<O, A>>) -> Self {
        Self { fold }
    }

    /// Id of the underlying node.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.fold.id()
    }

    /// The mode chosen at construction.
    #[must_use]
    pub fn mode(&self) -> FoldMode {
        self.fold.mode()
    }

    /// Whether every declared producer has delivered.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.fold.is_ready()
    }

    /// See [`FoldNode::run`].
    ///
    /// # Errors
    /// Propagates [`FoldNode::run`] errors.
    pub fn run(&self) -> Result<(), GraphError> {
        self.fold.run()
    }

    /// The accumulated result after a run, `None` otherwise.
    #[must_use]
    pub fn result(&self) -> Option<O> {
        self.fold.result()
    }

    /// See [`FoldNode::on_computed`].
    pub fn on_computed(&self, callback: impl Fn(&O) + Send + Sync + 'static) {
        self.fold.on_computed(callback);
    }
}

impl<O, A> Producer for FoldHandle<O, A>
where
    O: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    type Output = O;

    fn id(&self) -> NodeId {
        self.fold.id()
    }

    fn add_edge(&self, consumer: NodeId, deliver: DeliveryFn<O>) {
        self.fold.add_edge(consumer, deliver);
    }
}

/// Value shapes a producer may deliver into a fold over `A`: a single
/// element, or a batch (`Vec<A>`) whose elements are applied atomically with
/// respect to other producers.
pub trait FoldValue<A>: Send + Sync + 'static {
    #[doc(hidden)]
    fn deliver<O>(&self, fold: &FoldNode<O, A>)
    where
        O: Clone + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static;
}

impl<A> FoldValue<A> for A
where
    A: Clone + Send + Sync + 'static,
{
    fn deliver<O>(&self, fold: &FoldNode<O, A>)
    where
        O: Clone + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
    {
        fold.deliver_one(self.clone());
    }
}

impl<A> FoldValue<A> for Vec<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn deliver<O>(&self, fold: &FoldNode<O, A>)
    where
        O: Clone + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
    {
        fold.deliver_batch(self);
    }
}

/// Installs an edge from `producer` into `consumer` and increments the
/// consumer's declared-input count.
///
/// The producer may yield either a single `A` or a `Vec<A>` batch; both
/// shapes are accepted through [`FoldValue`]. Unlike plain-node wiring there
/// is no slot to contest, so this cannot fail.
pub fn connect_fold<P, O, A>(producer: &P, consumer: &FoldHandle<O, A>)
where
    P: Producer + ?Sized,
    P::Output: FoldValue<A>,
    O: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    consumer.fold.declare_input();
    let target = Arc::clone(&consumer.fold);
    producer.add_edge(
        consumer.id(),
        Box::new(move |value: &P::Output| value.deliver(&target)),
    );
}

/// Tuple of producer handles wired into a fold node.
///
/// Every element's output type must be deliverable into the fold, i.e.
/// either `A` itself or `Vec<A>`.
pub trait WireFold<O, A> {
    #[doc(hidden)]
    fn wire(self, consumer: &FoldHandle<O, A>);
}

/// Passing `()` as the producer tuple wires nothing: the caller connects
/// edges explicitly afterwards via [`connect_fold`].
impl<O, A> WireFold<O, A> for () {
    fn wire(self, _consumer: &FoldHandle<O, A>) {}
}

macro_rules! fold_wire {
    ($($P:ident $idx:tt),+) => {
        impl<'a, O, A, $($P),+> WireFold<O, A> for ($(&'a $P,)+)
        where
            O: Clone + Send + Sync + 'static,
            A: Clone + Send + Sync + 'static,
            $($P: Producer + ?Sized, <$P as Producer>::Output: FoldValue<A>,)+
        {
            fn wire(self, consumer: &FoldHandle<O, A>) {
                $(connect_fold(self.$idx, consumer);)+
            }
        }
    };
}

fold_wire!(P0 0);
fold_wire!(P0 0, P1 1);
fold_wire!(P0 0, P1 1, P2 2);
fold_wire!(P0 0, P1 1, P2 2, P3 3);
