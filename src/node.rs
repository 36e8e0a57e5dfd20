use crate::error::GraphError;
use crate::sync::{Arc, AtomicBool, Mutex, Ordering};
use crate::types::NodeId;
use core::any::Any;
use derive_more::Debug;

/// Closure that writes one producer output into one consumer input.
///
/// Installed on the producer at wiring time, monomorphized over both end
/// types, and invoked on whichever thread runs the producer.
#[doc(hidden)]
pub type DeliveryFn<O> = Box<dyn Fn(&O) + Send + Sync>;

/// Internal storage form of a node's computation.
#[doc(hidden)]
pub type StoredFn<I, O> = Box<dyn Fn(&<I as Inputs>::Slots) -> O + Send + Sync>;

/// Capability interface over heterogeneous nodes.
///
/// The graph owns nodes of arbitrary output and input types behind this
/// trait; the scheduler only ever needs these four capabilities plus a
/// downcast hook for `set_input`.
pub(crate) trait RunnableNode: Send + Sync {
    fn id(&self) -> NodeId;
    fn is_ready(&self) -> bool;
    fn run(&self) -> Result<(), GraphError>;
    /// Multiset of consumer ids fed by this node, in wiring order. A
    /// consumer appears once per slot it takes from this producer.
    fn output_ids(&self) -> Vec<NodeId>;
    fn as_any(&self) -> &dyn Any;
}

/// One positional input of a node.
///
/// The slot is written by exactly one producer thread (the one running that
/// producer), so the value itself only needs a lock against the consumer
/// reading it during its own run; publication is ordered by the `set` flag.
#[derive(Debug)]
pub struct InputSlot<T> {
    #[debug(skip)]
    value: Mutex<Option<T>>,
    set: AtomicBool,
    wired: AtomicBool,
}

impl<T> InputSlot<T> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
            set: AtomicBool::new(false),
            wired: AtomicBool::new(false),
        }
    }

    pub(crate) fn deliver(&self, value: T) {
        *self.value.lock().expect("InputSlot::deliver: poisoned") = Some(value);
        self.set.store(true, Ordering::Release);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Claims the slot for wiring; false if it was already claimed.
    fn claim_wire(&self) -> bool {
        !self.wired.swap(true, Ordering::AcqRel)
    }
}

/// Ordered tuple of input types of a node.
///
/// Implemented for tuples of arity 0 through 4. The unit type `()` is the
/// input list of zero-input (input) nodes.
pub trait Inputs: Send + Sync + 'static {
    /// One [`InputSlot`] per input type, in declaration order.
    type Slots: Send + Sync;
    /// Number of declared inputs.
    const ARITY: usize;
    #[doc(hidden)]
    fn make_slots() -> Self::Slots;
    #[doc(hidden)]
    fn all_set(slots: &Self::Slots) -> bool;
}

/// Typed access to the input slot at position `SLOT`.
pub trait SlotAt<const SLOT: usize>: Inputs {
    /// The value type stored in this slot.
    type Value: Clone + Send + Sync + 'static;
    #[doc(hidden)]
    fn slot(slots: &Self::Slots) -> &InputSlot<Self::Value>;
}

/// Conversion of a user closure into a node's internal function form.
///
/// Implemented for any `Fn(&I0, …, &Iₙ₋₁) -> O` matching the node's input
/// list positionally.
pub trait NodeFn<I: Inputs, O>: Send + Sync + 'static {
    #[doc(hidden)]
    fn into_function(self) -> StoredFn<I, O>;
}

/// A handle whose output can feed consumer slots.
///
/// Implemented by [`NodeHandle`] and
/// [`FoldHandle`](crate::fold::FoldHandle).
pub trait Producer {
    /// The value type this node produces.
    type Output: Clone + Send + Sync + 'static;
    /// Id of the producing node.
    fn id(&self) -> NodeId;
    #[doc(hidden)]
    fn add_edge(&self, consumer: NodeId, deliver: DeliveryFn<Self::Output>);
}

/// Tuple of producer handles wired positionally into a consumer's slots.
///
/// Arity of the tuple must equal the arity of the consumer's input list and
/// the output types must match positionally; both are enforced at compile
/// time.
pub trait Wire<I: Inputs> {
    #[doc(hidden)]
    fn wire<O>(self, consumer: &NodeHandle<O, I>) -> Result<(), GraphError>
    where
        O: Clone + Send + Sync + 'static;
}

impl Inputs for () {
    type Slots = ();
    const ARITY: usize = 0;

    fn make_slots() -> Self::Slots {}

    fn all_set(_slots: &Self::Slots) -> bool {
        true
    }
}

impl<O, F> NodeFn<(), O> for F
where
    F: Fn() -> O + Send + Sync + 'static,
{
    fn into_function(self) -> StoredFn<(), O> {
        Box::new(move |_slots| self())
    }
}

/// Passing `()` as the producer tuple wires nothing: the caller connects
/// edges explicitly afterwards via [`connect`].
impl<I: Inputs> Wire<I> for () {
    fn wire<O>(self, _consumer: &NodeHandle<O, I>) -> Result<(), GraphError>
    where
        O: Clone + Send + Sync + 'static,
    {
        Ok(())
    }
}

macro_rules! slot_at_impls {
    (($($AllT:ident),+) ;) => {};
    (($($AllT:ident),+) ; $T:ident $idx:tt, $($rest:tt)*) => {
        impl<$($AllT),+> SlotAt<$idx> for ($($AllT,)+)
        where
            $($AllT: Clone + Send + Sync + 'static,)+
        {
            type Value = $T;

            fn slot(slots: &Self::Slots) -> &InputSlot<$T> {
                &slots.$idx
            }
        }

        slot_at_impls!(($($AllT),+) ; $($rest)*);
    };
}

macro_rules! wire_connects {
    (($($AllT:ident),+), $O:ident, $self:ident, $consumer:ident ;) => {};
    (($($AllT:ident),+), $O:ident, $self:ident, $consumer:ident ; $idx:tt $P:ident, $($rest:tt)*) => {
        connect::<$idx, $P, $O, ($($AllT,)+)>($self.$idx, $consumer)?;
        wire_connects!(($($AllT),+), $O, $self, $consumer ; $($rest)*);
    };
}

macro_rules! tuple_inputs {
    (
        $arity:literal,
        ($($T:ident $P:ident $var:ident $idx:tt),+)
    ) => {
        impl<$($T),+> Inputs for ($($T,)+)
        where
            $($T: Clone + Send + Sync + 'static,)+
        {
            type Slots = ($(InputSlot<$T>,)+);
            const ARITY: usize = $arity;

            fn make_slots() -> Self::Slots {
                ($(InputSlot::<$T>::new(),)+)
            }

            fn all_set(slots: &Self::Slots) -> bool {
                true $(&& slots.$idx.is_set())+
            }
        }

        slot_at_impls!(($($T),+) ; $($T $idx,)+);

        impl<O, F, $($T),+> NodeFn<($($T,)+), O> for F
        where
            F: Fn($(&$T),+) -> O + Send + Sync + 'static,
            $($T: Clone + Send + Sync + 'static,)+
        {
            fn into_function(self) -> StoredFn<($($T,)+), O> {
                Box::new(move |slots| {
                    $(
                        let $var = slots
                            .$idx
                            .value
                            .lock()
                            .expect("Node: input slot poisoned");
                    )+
                    self($($var.as_ref().expect("Node: empty input slot after readiness")),+)
                })
            }
        }

        impl<'a, $($T, $P),+> Wire<($($T,)+)> for ($(&'a $P,)+)
        where
            $($T: Clone + Send + Sync + 'static,)+
            $($P: Producer<Output = $T> + ?Sized,)+
        {
            fn wire<O>(self, consumer: &NodeHandle<O, ($($T,)+)>) -> Result<(), GraphError>
            where
                O: Clone + Send + Sync + 'static,
            {
                wire_connects!(($($T),+), O, self, consumer ; $($idx $P,)+);
                Ok(())
            }
        }
    };
}

tuple_inputs!(1, (I0 P0 i0 0));
tuple_inputs!(2, (I0 P0 i0 0, I1 P1 i1 1));
tuple_inputs!(3, (I0 P0 i0 0, I1 P1 i1 1, I2 P2 i2 2));
tuple_inputs!(4, (I0 P0 i0 0, I1 P1 i1 1, I2 P2 i2 2, I3 P3 i3 3));

/// Outgoing edges of a node: the delivery closures and, in step with them,
/// the multiset of consumer ids they feed. Observer callbacks registered via
/// `on_computed` appear in `callbacks` only.
struct OutEdges<O> {
    callbacks: Vec<DeliveryFn<O>>,
    consumers: Vec<NodeId>,
}

impl<O> OutEdges<O> {
    fn new() -> Self {
        Self {
            callbacks: Vec::new(),
            consumers: Vec::new(),
        }
    }
}

/// One vertex of the graph: a pure function with typed inputs and a typed
/// output.
///
/// A node holds a slot per declared input, the result (empty until the node
/// has run), and the ordered list of output callbacks installed by wiring.
/// The only mutating operations during a run are input delivery and
/// [`run`](Self::run) itself.
#[derive(Debug)]
#[must_use]
pub struct Node<O, I: Inputs = ()> {
    id: NodeId,
    #[debug(skip)]
    function: Mutex<Option<StoredFn<I, O>>>,
    #[debug(skip)]
    slots: I::Slots,
    #[debug(skip)]
    result: Mutex<Option<O>>,
    #[debug(skip)]
    out: Mutex<OutEdges<O>>,
}

impl<O, I> Node<O, I>
where
    O: Clone + Send + Sync + 'static,
    I: Inputs,
{
    pub(crate) fn new(id: NodeId) -> Self {
        Self {
            id,
            function: Mutex::new(None),
            slots: I::make_slots(),
            result: Mutex::new(None),
            out: Mutex::new(OutEdges::new()),
        }
    }

    pub(crate) fn with_function(id: NodeId, function: impl NodeFn<I, O>) -> Self {
        let node = Self::new(id);
        node.set_function(function);
        node
    }

    /// Id assigned at registration time.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Whether every input slot holds a value. Zero-input nodes are
    /// vacuously ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        I::all_set(&self.slots)
    }

    /// Replaces the node's computation.
    pub fn set_function(&self, function: impl NodeFn<I, O>) {
        *self.function.lock().expect("Node::set_function: poisoned") =
            Some(function.into_function());
    }

    /// The produced output, or `None` if the node has not run yet.
    #[must_use]
    pub fn result(&self) -> Option<O> {
        self.result.lock().expect("Node::result: poisoned").clone()
    }

    /// Executes the node: applies the function to the inputs, stores the
    /// result, then fires every outbound callback in insertion order.
    ///
    /// Callbacks execute on the calling thread, so all slot writes performed
    /// by one producer are serialized by virtue of a single thread walking a
    /// single list.
    ///
    /// # Errors
    /// [`GraphError::NotReady`] if some input slot is still empty,
    /// [`GraphError::FunctionNotSet`] if no computation was assigned.
    pub fn run(&self) -> Result<(), GraphError> {
        if !self.is_ready() {
            return Err(GraphError::NotReady { node: self.id });
        }
        let output = {
            let function = self.function.lock().expect("Node::run: function poisoned");
            let function = function
                .as_ref()
                .ok_or(GraphError::FunctionNotSet { node: self.id })?;
            function(&self.slots)
        };
        *self.result.lock().expect("Node::run: result poisoned") = Some(output.clone());
        let out = self.out.lock().expect("Node::run: edges poisoned");
        for callback in &out.callbacks {
            callback(&output);
        }
        Ok(())
    }

    /// Registers an observer invoked with the output right after this node
    /// computes, in registration order relative to the delivery callbacks.
    pub fn on_computed(&self, callback: impl Fn(&O) + Send + Sync + 'static) {
        self.out
            .lock()
            .expect("Node::on_computed: poisoned")
            .callbacks
            .push(Box::new(callback));
    }

    pub(crate) fn add_edge(&self, consumer: NodeId, deliver: DeliveryFn<O>) {
        let mut out = self.out.lock().expect("Node::add_edge: poisoned");
        out.callbacks.push(deliver);
        out.consumers.push(consumer);
    }
}

impl<O, I> RunnableNode for Node<O, I>
where
    O: Clone + Send + Sync + 'static,
    I: Inputs,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn is_ready(&self) -> bool {
        Node::is_ready(self)
    }

    fn run(&self) -> Result<(), GraphError> {
        Node::run(self)
    }

    fn output_ids(&self) -> Vec<NodeId> {
        self.out
            .lock()
            .expect("Node::output_ids: poisoned")
            .consumers
            .clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shared handle to a typed node.
///
/// Handles returned by the graph stay valid for as long as the graph lives;
/// they are the caller's way to wire edges and read results. A handle can
/// also be created detached from any graph via [`NodeHandle::new`], in which
/// case the caller drives [`run`](Self::run) itself.
#[derive(Debug)]
#[must_use]
pub struct NodeHandle<O, I: Inputs = ()> {
    node: Arc<Node<O, I>>,
}

/// Handle to a zero-input node whose output is a caller-supplied constant.
pub type InputHandle<T> = NodeHandle<T, ()>;

impl<O, I> Clone for NodeHandle<O, I>
where
    I: Inputs,
{
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<O, I> NodeHandle<O, I>
where
    O: Clone + Send + Sync + 'static,
    I: Inputs,
{
    /// Creates a detached node with the given id and no function.
    pub fn new(id: NodeId) -> Self {
        Self {
            node: Arc::new(Node::new(id)),
        }
    }

    /// Creates a detached node with the given id and computation.
    pub fn with_function(id: NodeId, function: impl NodeFn<I, O>) -> Self {
        Self {
            node: Arc::new(Node::with_function(id, function)),
        }
    }

    pub(crate) fn from_arc(node: Arc<Node<O, I>>) -> Self {
        Self { node }
    }

    /// Id of the underlying node.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// Whether every input slot of the node holds a value.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.node.is_ready()
    }

    /// See [`Node::run`].
    ///
    /// # Errors
    /// Propagates [`Node::run`] errors.
    pub fn run(&self) -> Result<(), GraphError> {
        self.node.run()
    }

    /// The node's result after a run, `None` otherwise.
    #[must_use]
    pub fn result(&self) -> Option<O> {
        self.node.result()
    }

    /// See [`Node::set_function`].
    pub fn set_function(&self, function: impl NodeFn<I, O>) {
        self.node.set_function(function);
    }

    /// See [`Node::on_computed`].
    pub fn on_computed(&self, callback: impl Fn(&O) + Send + Sync + 'static) {
        self.node.on_computed(callback);
    }

    fn slot<const SLOT: usize>(&self) -> &InputSlot<<I as SlotAt<SLOT>>::Value>
    where
        I: SlotAt<SLOT>,
    {
        I::slot(&self.node.slots)
    }
}

impl<O, I> Producer for NodeHandle<O, I>
where
    O: Clone + Send + Sync + 'static,
    I: Inputs,
{
    type Output = O;

    fn id(&self) -> NodeId {
        self.node.id()
    }

    fn add_edge(&self, consumer: NodeId, deliver: DeliveryFn<O>) {
        self.node.add_edge(consumer, deliver);
    }
}

/// Installs an edge from `producer` into slot `SLOT` of `consumer`.
///
/// The edge is a closure stored on the producer: when the producer's output
/// becomes available, the closure clones it into the consumer's slot. The
/// producer's output type must equal the slot's declared type; this is
/// checked at compile time.
///
/// # Errors
/// [`GraphError::DuplicateSlot`] if the slot is already connected.
pub fn connect<const SLOT: usize, P, O, I>(
    producer: &P,
    consumer: &NodeHandle<O, I>,
) -> Result<(), GraphError>
where
    P: Producer<Output = <I as SlotAt<SLOT>>::Value> + ?Sized,
    O: Clone + Send + Sync + 'static,
    I: SlotAt<SLOT>,
{
    if !consumer.slot::<SLOT>().claim_wire() {
        return Err(GraphError::DuplicateSlot {
            node: consumer.id(),
            slot: SLOT,
        });
    }
    let target = Arc::clone(&consumer.node);
    producer.add_edge(
        NodeHandle::id(consumer),
        Box::new(move |value| I::slot(&target.slots).deliver(value.clone())),
    );
    Ok(())
}
