//! Error types for dependency graph operations.

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::fmt;
use thiserror::Error;

/// Boxed error returned by module consumers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for dependency graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, ranking or walking a dependency graph.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A module requires a key that no module provides.
    #[error("Module '{module}' requires '{key}' but no module provides it")]
    #[diagnostic(
        code(modgraph::unsatisfied_dependency),
        help("Add a module that provides the key or make the dependency optional")
    )]
    UnsatisfiedDependency {
        /// The consuming module.
        module: String,
        /// The key without a producer.
        key: String,
    },

    /// The graph is not a DAG.
    #[error("Dependency graph contains cycles: {}", format_cycles(.cycles))]
    #[diagnostic(code(modgraph::cyclic_graph))]
    CyclicGraph {
        /// Members of each non-trivial strongly connected component.
        cycles: Vec<Vec<String>>,
    },

    /// A node was referenced that is not part of the graph.
    #[error("Node '{node}' is not part of the graph")]
    #[diagnostic(code(modgraph::unknown_node))]
    UnknownNode {
        /// The unknown node.
        node: String,
    },

    /// Execution priority outside the accepted range.
    #[error("Priority of module '{module}' not in range 0..={max}: {priority}", max = crate::MAX_PRIORITY)]
    #[diagnostic(code(modgraph::invalid_priority))]
    InvalidPriority {
        /// The module carrying the priority.
        module: String,
        /// The rejected priority.
        priority: u32,
    },

    /// Edge weight outside the accepted range.
    #[error("Weight of edge '{from}' -> '{to}' not in range 1..={max}: {weight}", max = crate::MAX_EDGE_WEIGHT)]
    #[diagnostic(code(modgraph::invalid_edge_weight))]
    InvalidEdgeWeight {
        /// Edge source.
        from: String,
        /// Edge target.
        to: String,
        /// The rejected weight.
        weight: u32,
    },

    /// A walker was configured without any permits.
    #[error("Parallelism must be at least 1, got {parallelism}")]
    #[diagnostic(code(modgraph::invalid_parallelism))]
    InvalidParallelism {
        /// The rejected parallelism bound.
        parallelism: usize,
    },

    /// A walker was reused or belongs to another graph.
    #[error("Walker has already been driven or does not match the graph")]
    #[diagnostic(
        code(modgraph::stale_walker),
        help("Create a new walker for every walk")
    )]
    StaleWalker,

    /// A module consumer failed during a walk.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Execution(#[from] ExecutionFailure),
}

impl Error {
    /// Create an unsatisfied dependency error.
    #[must_use]
    pub fn unsatisfied(module: impl fmt::Display, key: impl fmt::Debug) -> Self {
        Self::UnsatisfiedDependency {
            module: module.to_string(),
            key: render_key(&key),
        }
    }

    /// Create an unknown node error.
    #[must_use]
    pub fn unknown_node(node: impl fmt::Display) -> Self {
        Self::UnknownNode {
            node: node.to_string(),
        }
    }

    /// Returns the offending cycles if this is a [`Error::CyclicGraph`].
    #[must_use]
    pub fn cycles(&self) -> Option<&[Vec<String>]> {
        match self {
            Self::CyclicGraph { cycles } => Some(cycles),
            _ => None,
        }
    }
}

/// Failure recorded while walking the graph.
///
/// Carries the first failing node and its error. Failures reported by other
/// modules that were already running are attached as `suppressed`.
#[derive(Error, Debug, Diagnostic)]
#[error("Module '{node}' failed: {source}")]
#[diagnostic(code(modgraph::execution))]
pub struct ExecutionFailure {
    /// The node whose consumer failed first.
    pub node: String,
    /// The consumer error.
    #[source]
    pub source: BoxError,
    /// Later failures of modules that were already running.
    pub suppressed: Vec<(String, BoxError)>,
}

impl ExecutionFailure {
    /// Create a failure for `node`.
    #[must_use]
    pub fn new(node: impl fmt::Display, source: BoxError) -> Self {
        Self {
            node: node.to_string(),
            source,
            suppressed: Vec::new(),
        }
    }

    /// Attach a later failure.
    pub fn suppress(&mut self, node: impl fmt::Display, source: BoxError) {
        self.suppressed.push((node.to_string(), source));
    }
}

/// Error used when a consumer panics on a worker thread.
#[derive(Error, Debug)]
#[error("consumer panicked: {message}")]
pub struct ConsumerPanic {
    /// Panic payload, if it was a string.
    pub message: String,
}

pub(crate) fn render_key(key: &impl fmt::Debug) -> String {
    let rendered = format!("{key:?}");
    rendered
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .map_or_else(|| rendered.clone(), str::to_string)
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    if cycles.is_empty() {
        return "(cycle members unknown)".to_string();
    }
    cycles
        .iter()
        .map(|cycle| format!("[{}]", cycle.join(" -> ")))
        .collect::<Vec<_>>()
        .join(", ")
}
