use crate::types::NodeId;
use thiserror::Error;

/// Error kind for graph construction and execution failures.
///
/// Wiring and input errors are reported synchronously to the offending
/// caller. Failures inside worker threads are captured into a per-run error
/// slot and surfaced from [`Graph::run`](crate::graph::Graph::run); the first
/// failure per run wins, subsequent ones are suppressed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphError {
    /// `run` was invoked on a node whose inputs are not all set.
    ///
    /// In normal scheduled execution this cannot occur; it signals an
    /// internal invariant break and is fatal for the current graph run.
    #[error("node {node} is not ready: some inputs are not set")]
    NotReady {
        /// The node whose inputs were incomplete.
        node: NodeId,
    },
    /// An input value was supplied whose type does not match the input
    /// node's declared output type, or the id does not refer to an input
    /// node. The graph state is unchanged.
    #[error("node {node} is not an input node of the supplied type")]
    BadInputType {
        /// The node the value was offered to.
        node: NodeId,
    },
    /// The id is not registered in this graph.
    #[error("node id {node} is not registered in this graph")]
    InvalidNodeId {
        /// The out-of-range id.
        node: NodeId,
    },
    /// `connect` was called twice for the same input slot of the same node.
    #[error("input slot {slot} of node {node} is already connected")]
    DuplicateSlot {
        /// The consumer whose slot was wired twice.
        node: NodeId,
        /// The contested slot index.
        slot: usize,
    },
    /// A node was run before any computation was assigned to it, e.g. an
    /// input node whose value was never set.
    #[error("node {node} has no function set")]
    FunctionNotSet {
        /// The node missing a function.
        node: NodeId,
    },
    /// A user-supplied function panicked while the node was executing.
    #[error("node {node} failed: {message}")]
    UserFunction {
        /// The node whose function failed.
        node: NodeId,
        /// The captured panic message.
        message: String,
    },
}
