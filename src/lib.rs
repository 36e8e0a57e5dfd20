//! Parallel computational-graph execution engine.
//!
//! This crate lets a caller declare a directed acyclic graph (DAG) of pure,
//! typed computations: input sources, transforms, and fold/aggregation
//! nodes. It then executes the DAG once across a fixed-size worker pool.
//! Each node fires exactly when all of its inputs have been produced, and
//! control returns when every node has run. It:
//! - Delivers upstream outputs into downstream input slots through typed
//!   callbacks installed at wiring time, so a mis-typed or mis-sized edge is
//!   a compile error.
//! - Drives readiness with a dataflow scheduler: a node is handed to the
//!   pool exactly once, only at a moment when all its inputs are set.
//! - Dispatches onto a worker pool backed by a delay-aware job queue, which
//!   also supports delayed and repeating submissions.
//!
//! Key modules:
//! - `graph`: graph construction and the run loop (readiness propagation,
//!   quiescence detection, failure capture).
//! - `node`: the typed node abstraction, input slots and edge wiring.
//! - `fold`: fold nodes aggregating dynamic fan-in, streaming or batched.
//! - `pool` / `queue`: the worker pool and the ready-time-ordered job queue
//!   it pulls from.
//!
//! Quick start:
//! 1. Create a [`graph::Graph`] with a worker count.
//! 2. Add inputs via `add_input`, set their values, and add transforms via
//!    `add_node`, passing the producer handles positionally.
//! 3. Call `run()`, then read results through the handles.
//!
//! ```
//! use pcg::{fold::FoldMode, graph::Graph};
//!
//! let mut graph = Graph::new(8);
//! let input = graph.add_input::<i32>();
//! graph.set_input(input.id(), 10).unwrap();
//! let square = graph.add_node(|x: &i32| f64::from(x * x), (&input,));
//! let root = graph.add_node(|x: &i32| f64::from(*x).sqrt(), (&input,));
//! let sum = graph.add_fold(
//!     FoldMode::Batched,
//!     |acc: f64, value: &f64| acc + value,
//!     0.0,
//!     (&square, &root),
//! );
//! graph.run().unwrap();
//! assert!((sum.result().unwrap() - (100.0 + 10f64.sqrt())).abs() < 1e-9);
//! ```

/// Engine configuration: worker count and poll interval.
pub mod config;
/// Error kinds for wiring, input and execution failures.
pub mod error;
/// Fold nodes: aggregation over one-or-many producers with dynamic fan-in.
///
/// Contains `FoldNode`/`FoldHandle`, the streaming/batched `FoldMode`, and
/// the `connect_fold` wiring entry point.
pub mod fold;
/// Graph construction and the dataflow scheduler.
///
/// The graph owns nodes by id, seeds a run from the input nodes, propagates
/// readiness as producers complete, and waits for global quiescence.
pub mod graph;
/// Typed nodes, input slots, and edge wiring.
///
/// Defines `Node`/`NodeHandle`, the `Inputs`/`SlotAt` tuple machinery that
/// types each slot, and the `connect` function installing delivery closures
/// on producers.
pub mod node;
/// Fixed worker pool with immediate, delayed and repeating submissions.
pub mod pool;
/// Thread-safe priority queue keyed on earliest-ready time.
pub mod queue;
mod sync;
/// Node identity and shared aliases.
pub mod types;
mod utils;
