//! Module dependency graphs for initialization pipelines.
//!
//! This crate builds a directed acyclic graph among modules from their
//! dependency descriptors, validates it, ranks it and walks it concurrently
//! so that a module is never processed before everything it depends on has
//! finished.
//!
//! # Key Types
//!
//! - [`Descriptor`]: what a module requires, optionally requires and provides
//! - [`GraphBuilder`]: matches producers to consumers and builds a [`GraphModel`]
//! - [`CycleDetector`]: strongly connected component scan for diagnostics
//! - [`RankingSorter`]: topological order and priority-aware longest-path ranks
//! - [`GraphWalker`]: release/complete/fail protocol bounding parallel execution
//! - [`DependencyGraph`]: facade composing all of the above
//!
//! # Example
//!
//! ```ignore
//! use modgraph::{DependencyGraph, Descriptor, GraphBuilder};
//!
//! let mut builder = GraphBuilder::new();
//! builder.add("db", Descriptor::builder("db").build()?);
//! builder.add("api", Descriptor::builder("api").requires("db").build()?);
//! let graph = DependencyGraph::from_builder(builder)?;
//!
//! let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build()?;
//! graph.walk_graph(&pool, |module: &&str| {
//!     tracing::info!(module, "initializing");
//!     Ok::<_, std::io::Error>(())
//! })?;
//! ```

mod builder;
mod config;
mod cycles;
mod descriptor;
mod error;
mod graph;
mod model;
mod printer;
mod ranking;
pub mod walker;

use std::fmt;
use std::hash::Hash;

pub use builder::GraphBuilder;
pub use config::{WalkConfig, WalkerKind};
pub use cycles::CycleDetector;
pub use descriptor::{Describe, Descriptor, DescriptorBuilder};
pub use error::{BoxError, ConsumerPanic, Error, ExecutionFailure, Result};
pub use graph::DependencyGraph;
pub use model::{Edge, GraphModel, GraphView};
pub use printer::{DependencyTreePrinter, ModuleRankingsPrinter};
pub use ranking::{RankingSorter, Rankings};
pub use walker::{GraphWalker, NodeState, ReadyQueueWalker, Release, RescanWalker};

/// Highest accepted execution priority.
pub const MAX_PRIORITY: u32 = 100_000;

/// Highest accepted edge weight.
pub const MAX_EDGE_WEIGHT: u32 = 100_000;

/// Edge weight used when none is given.
pub const DEFAULT_EDGE_WEIGHT: u32 = 1;

/// Identity of a node in the graph.
///
/// Blanket-implemented for every type that is cheap enough to clone, can be
/// hashed and compared, and can be shared across worker threads. `Display`
/// is used for diagnostics and printers.
pub trait Vertex: Clone + Eq + Hash + fmt::Display + Send + Sync {}

impl<T> Vertex for T where T: Clone + Eq + Hash + fmt::Display + Send + Sync {}

/// Key matching producers to consumers.
pub trait Key: Clone + Eq + Hash + fmt::Debug {}

impl<T> Key for T where T: Clone + Eq + Hash + fmt::Debug {}

/// Processing closure invoked once per module while walking the graph.
pub trait ModuleConsumer<M> {
    /// Process a single module.
    ///
    /// # Errors
    ///
    /// Any error halts the walk; modules depending on `module` are never
    /// processed.
    fn process(&self, module: &M) -> std::result::Result<(), BoxError>;
}

impl<M, F, E> ModuleConsumer<M> for F
where
    F: Fn(&M) -> std::result::Result<(), E>,
    E: Into<BoxError>,
{
    fn process(&self, module: &M) -> std::result::Result<(), BoxError> {
        self(module).map_err(Into::into)
    }
}
