//! Cycle detection using strongly connected components.

use crate::{Error, GraphModel, Vertex};
use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use tracing::debug;

/// Tarjan scan reporting the non-trivial cycles of a graph.
///
/// A non-trivial cycle is a strongly connected component with more than
/// one member. Members are listed in node insertion order and cycles are
/// ordered by their first member.
#[derive(Debug, Clone)]
pub struct CycleDetector<'a, M: Vertex> {
    graph: &'a GraphModel<M>,
    components: Vec<Vec<NodeIndex>>,
}

impl<'a, M: Vertex> CycleDetector<'a, M> {
    /// Run the scan over `graph`.
    #[must_use]
    pub fn new(graph: &'a GraphModel<M>) -> Self {
        let mut components: Vec<Vec<NodeIndex>> = tarjan_scc(graph.inner())
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|mut component| {
                component.sort_unstable();
                component
            })
            .collect();
        components.sort_unstable_by_key(|component| component[0]);

        if !components.is_empty() {
            debug!(cycles = components.len(), "Found dependency cycles");
        }

        Self { graph, components }
    }

    /// Whether the graph has at least one non-trivial cycle.
    #[must_use]
    pub fn has_cycles(&self) -> bool {
        !self.components.is_empty()
    }

    /// Members of each non-trivial cycle.
    #[must_use]
    pub fn nontrivial_cycles(&self) -> Vec<Vec<M>> {
        self.components
            .iter()
            .map(|component| {
                component
                    .iter()
                    .map(|&ix| self.graph.node(ix).clone())
                    .collect()
            })
            .collect()
    }

    /// Fail with [`Error::CyclicGraph`] if any cycle was found.
    ///
    /// # Errors
    ///
    /// Returns the cycles rendered with `Display`.
    pub fn check(&self) -> crate::Result<()> {
        if self.has_cycles() {
            return Err(self.to_error());
        }
        Ok(())
    }

    pub(crate) fn to_error(&self) -> Error {
        Error::CyclicGraph {
            cycles: self
                .components
                .iter()
                .map(|component| {
                    component
                        .iter()
                        .map(|&ix| self.graph.node(ix).to_string())
                        .collect()
                })
                .collect(),
        }
    }
}
