//! Immutable directed graph of modules.
//!
//! An edge `producer -> consumer` means the consumer depends on the producer.
//! Successor and predecessor indices are built once at construction; the
//! model is read-only afterwards and safe to share between threads.

use crate::{DEFAULT_EDGE_WEIGHT, Error, MAX_EDGE_WEIGHT, Result, Vertex};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::trace;

/// A weighted edge from `source` (producer) to `target` (consumer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge<M> {
    source: M,
    target: M,
    weight: u32,
}

impl<M> Edge<M> {
    /// Create an edge with the default weight of 1.
    #[must_use]
    pub fn new(source: M, target: M) -> Self {
        Self::with_weight(source, target, DEFAULT_EDGE_WEIGHT)
    }

    /// Create an edge with an explicit weight.
    #[must_use]
    pub fn with_weight(source: M, target: M, weight: u32) -> Self {
        Self {
            source,
            target,
            weight,
        }
    }

    /// The producer.
    #[must_use]
    pub fn source(&self) -> &M {
        &self.source
    }

    /// The consumer.
    #[must_use]
    pub fn target(&self) -> &M {
        &self.target
    }

    /// Edge weight used by the longest-path ranking.
    #[must_use]
    pub fn weight(&self) -> u32 {
        self.weight
    }
}

impl<M: fmt::Display> fmt::Display for Edge<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// Directed graph of modules.
#[derive(Debug, Clone)]
pub struct GraphModel<M: Vertex> {
    graph: DiGraph<M, u32>,
    index: HashMap<M, NodeIndex>,
    successors: Vec<Vec<NodeIndex>>,
    predecessors: Vec<Vec<NodeIndex>>,
}

impl<M: Vertex> GraphModel<M> {
    /// Build a graph from a node set and edges between those nodes.
    ///
    /// Duplicate nodes are ignored, self-edges are dropped and duplicate
    /// edges collapse into the first one seen.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownNode`] if an edge references a node outside
    /// `nodes`, or [`Error::InvalidEdgeWeight`] for weights outside
    /// `1..=100000`.
    pub fn new(
        nodes: impl IntoIterator<Item = M>,
        edges: impl IntoIterator<Item = Edge<M>>,
    ) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for node in nodes {
            if !index.contains_key(&node) {
                let ix = graph.add_node(node.clone());
                index.insert(node, ix);
            }
        }

        let mut seen = HashSet::new();
        for edge in edges {
            let (Some(&from), Some(&to)) = (index.get(&edge.source), index.get(&edge.target))
            else {
                let missing = if index.contains_key(&edge.source) {
                    &edge.target
                } else {
                    &edge.source
                };
                return Err(Error::unknown_node(missing));
            };
            if !(1..=MAX_EDGE_WEIGHT).contains(&edge.weight) {
                return Err(Error::InvalidEdgeWeight {
                    from: edge.source.to_string(),
                    to: edge.target.to_string(),
                    weight: edge.weight,
                });
            }
            if from == to {
                trace!(node = %edge.source, "Dropping self-edge");
                continue;
            }
            if seen.insert((from, to)) {
                graph.add_edge(from, to, edge.weight);
            }
        }

        let successors = Self::adjacency(&graph, Direction::Outgoing);
        let predecessors = Self::adjacency(&graph, Direction::Incoming);

        Ok(Self {
            graph,
            index,
            successors,
            predecessors,
        })
    }

    fn adjacency(graph: &DiGraph<M, u32>, direction: Direction) -> Vec<Vec<NodeIndex>> {
        graph
            .node_indices()
            .map(|ix| {
                let mut neighbors: Vec<_> = graph.neighbors_directed(ix, direction).collect();
                neighbors.sort_unstable();
                neighbors
            })
            .collect()
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &M> + '_ {
        self.graph.node_weights()
    }

    /// All edges, grouped by source in node order.
    pub fn edges(&self) -> impl Iterator<Item = Edge<&M>> + '_ {
        self.graph
            .node_indices()
            .flat_map(move |ix| self.edges_from(ix))
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether `vertex` is part of the graph.
    #[must_use]
    pub fn contains(&self, vertex: &M) -> bool {
        self.index.contains_key(vertex)
    }

    /// Modules depending directly on `vertex`.
    pub fn successors<'a>(&'a self, vertex: &M) -> impl Iterator<Item = &'a M> + use<'a, M> {
        self.neighbors(vertex, Direction::Outgoing)
    }

    /// Direct dependencies of `vertex`.
    pub fn predecessors<'a>(&'a self, vertex: &M) -> impl Iterator<Item = &'a M> + use<'a, M> {
        self.neighbors(vertex, Direction::Incoming)
    }

    /// Outgoing edges of `vertex`.
    pub fn successor_edges<'a>(
        &'a self,
        vertex: &M,
    ) -> impl Iterator<Item = Edge<&'a M>> + use<'a, M> {
        self.index_of(vertex)
            .into_iter()
            .flat_map(move |ix| self.edges_from(ix))
    }

    /// Incoming edges of `vertex`.
    pub fn predecessor_edges<'a>(
        &'a self,
        vertex: &M,
    ) -> impl Iterator<Item = Edge<&'a M>> + use<'a, M> {
        self.index_of(vertex).into_iter().flat_map(move |ix| {
            self.predecessors[ix.index()]
                .iter()
                .map(move |&from| self.edge_between(from, ix))
        })
    }

    /// Whether `vertex` has at least one dependency.
    #[must_use]
    pub fn has_predecessors(&self, vertex: &M) -> bool {
        self.index_of(vertex)
            .is_some_and(|ix| !self.predecessors[ix.index()].is_empty())
    }

    /// Whether some module depends on `vertex`.
    #[must_use]
    pub fn has_successors(&self, vertex: &M) -> bool {
        self.index_of(vertex)
            .is_some_and(|ix| !self.successors[ix.index()].is_empty())
    }

    /// A view of the graph without the `excluded` nodes and their edges.
    #[must_use]
    pub fn without<'a>(&'a self, excluded: impl IntoIterator<Item = &'a M>) -> GraphView<'a, M> {
        let excluded = excluded
            .into_iter()
            .filter_map(|vertex| self.index_of(vertex))
            .collect();
        GraphView {
            model: self,
            excluded,
        }
    }

    pub(crate) fn index_of(&self, vertex: &M) -> Option<NodeIndex> {
        self.index.get(vertex).copied()
    }

    pub(crate) fn node(&self, ix: NodeIndex) -> &M {
        &self.graph[ix]
    }

    pub(crate) fn successor_indices(&self, ix: NodeIndex) -> &[NodeIndex] {
        &self.successors[ix.index()]
    }

    pub(crate) fn predecessor_indices(&self, ix: NodeIndex) -> &[NodeIndex] {
        &self.predecessors[ix.index()]
    }

    pub(crate) fn weight(&self, from: NodeIndex, to: NodeIndex) -> u32 {
        self.graph
            .find_edge(from, to)
            .map_or(DEFAULT_EDGE_WEIGHT, |e| self.graph[e])
    }

    pub(crate) fn inner(&self) -> &DiGraph<M, u32> {
        &self.graph
    }

    fn neighbors<'a>(
        &'a self,
        vertex: &M,
        direction: Direction,
    ) -> impl Iterator<Item = &'a M> + use<'a, M> {
        let adjacency = match direction {
            Direction::Outgoing => &self.successors,
            Direction::Incoming => &self.predecessors,
        };
        self.index_of(vertex)
            .into_iter()
            .flat_map(move |ix| adjacency[ix.index()].iter().map(move |&n| &self.graph[n]))
    }

    fn edges_from(&self, ix: NodeIndex) -> impl Iterator<Item = Edge<&M>> + '_ {
        self.successors[ix.index()]
            .iter()
            .map(move |&to| self.edge_between(ix, to))
    }

    fn edge_between(&self, from: NodeIndex, to: NodeIndex) -> Edge<&M> {
        Edge::with_weight(&self.graph[from], &self.graph[to], self.weight(from, to))
    }
}

/// Read-only view of a [`GraphModel`] excluding a subset of nodes.
///
/// Used for filtered printing; the scheduler always works on the full model.
#[derive(Debug, Clone)]
pub struct GraphView<'a, M: Vertex> {
    model: &'a GraphModel<M>,
    excluded: HashSet<NodeIndex>,
}

impl<'a, M: Vertex> GraphView<'a, M> {
    fn keeps(&self, ix: NodeIndex) -> bool {
        !self.excluded.contains(&ix)
    }

    fn visible(&self, vertex: &M) -> Option<NodeIndex> {
        self.model.index_of(vertex).filter(|&ix| self.keeps(ix))
    }

    /// Remaining nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &'a M> + '_ {
        let model = self.model;
        model
            .graph
            .node_indices()
            .filter(|&ix| self.keeps(ix))
            .map(move |ix| &model.graph[ix])
    }

    /// Edges whose endpoints are both kept.
    pub fn edges(&self) -> impl Iterator<Item = Edge<&'a M>> + '_ {
        let model = self.model;
        model
            .graph
            .node_indices()
            .filter(|&ix| self.keeps(ix))
            .flat_map(move |ix| {
                model.successors[ix.index()]
                    .iter()
                    .filter(move |&&to| self.keeps(to))
                    .map(move |&to| model.edge_between(ix, to))
            })
    }

    /// Number of remaining nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.model.node_count() - self.excluded.len()
    }

    /// Whether `vertex` is part of the view.
    #[must_use]
    pub fn contains(&self, vertex: &M) -> bool {
        self.visible(vertex).is_some()
    }

    /// Successors of `vertex` that are kept.
    pub fn successors(&self, vertex: &M) -> Vec<&'a M> {
        self.filtered(vertex, GraphModel::successor_indices)
    }

    /// Predecessors of `vertex` that are kept.
    pub fn predecessors(&self, vertex: &M) -> Vec<&'a M> {
        self.filtered(vertex, GraphModel::predecessor_indices)
    }

    /// Outgoing edges of `vertex` to kept nodes.
    pub fn successor_edges(&self, vertex: &M) -> Vec<Edge<&'a M>> {
        let Some(ix) = self.visible(vertex) else {
            return Vec::new();
        };
        self.model.successors[ix.index()]
            .iter()
            .filter(|&&to| self.keeps(to))
            .map(|&to| self.model.edge_between(ix, to))
            .collect()
    }

    /// Incoming edges of `vertex` from kept nodes.
    pub fn predecessor_edges(&self, vertex: &M) -> Vec<Edge<&'a M>> {
        let Some(ix) = self.visible(vertex) else {
            return Vec::new();
        };
        self.model.predecessors[ix.index()]
            .iter()
            .filter(|&&from| self.keeps(from))
            .map(|&from| self.model.edge_between(from, ix))
            .collect()
    }

    /// Whether `vertex` has a kept predecessor.
    #[must_use]
    pub fn has_predecessors(&self, vertex: &M) -> bool {
        !self.predecessors(vertex).is_empty()
    }

    /// Whether `vertex` has a kept successor.
    #[must_use]
    pub fn has_successors(&self, vertex: &M) -> bool {
        !self.successors(vertex).is_empty()
    }

    fn filtered(
        &self,
        vertex: &M,
        adjacency: fn(&GraphModel<M>, NodeIndex) -> &[NodeIndex],
    ) -> Vec<&'a M> {
        let model = self.model;
        self.visible(vertex).map_or_else(Vec::new, |ix| {
            adjacency(model, ix)
                .iter()
                .filter(|&&n| self.keeps(n))
                .map(|&n| model.node(n))
                .collect()
        })
    }
}
