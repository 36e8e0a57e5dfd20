use derive_more::Display;
use indexmap::IndexSet as _IndexSet;
use rustc_hash::FxBuildHasher;

/// Unique identifier of a node in the graph.
///
/// Ids are assigned by the graph at registration time: monotonic, dense and
/// equal to insertion order. They are the sole handle for cross-node
/// references; the node objects themselves are owned by the graph.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates an id from a raw index.
    ///
    /// Only needed when constructing nodes outside of a graph; nodes
    /// registered through the graph receive their ids automatically.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of the node in the graph's dense node table.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for NodeId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

pub(crate) type IndexSet<T> = _IndexSet<T, FxBuildHasher>;
