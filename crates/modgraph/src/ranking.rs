//! Topological ordering and longest-path ranking.
//!
//! The rank of a module is its priority plus the longest weighted path to
//! any module depending on it. Every producer therefore ranks strictly
//! higher than its consumers, and sorting by rank descending yields a valid
//! topological order that prefers the modules blocking the most work.

use crate::{CycleDetector, Error, GraphModel, MAX_PRIORITY, Result, Vertex};
use indexmap::IndexMap;
use petgraph::graph::NodeIndex;
use tracing::debug;

/// Module ranks in rank-descending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rankings<M: Vertex> {
    ranks: IndexMap<M, u64>,
}

impl<M: Vertex> Rankings<M> {
    pub(crate) fn from_ranked(graph: &GraphModel<M>, ranked: &RankedOrder) -> Self {
        Self {
            ranks: ranked
                .order
                .iter()
                .map(|&ix| (graph.node(ix).clone(), ranked.ranks[ix.index()]))
                .collect(),
        }
    }

    /// Rank of `module`, if it is part of the graph.
    #[must_use]
    pub fn get(&self, module: &M) -> Option<u64> {
        self.ranks.get(module).copied()
    }

    /// Position of `module` in the ranked order.
    #[must_use]
    pub fn position(&self, module: &M) -> Option<usize> {
        self.ranks.get_index_of(module)
    }

    /// Modules with their ranks, highest rank first.
    pub fn iter(&self) -> impl Iterator<Item = (&M, u64)> + '_ {
        self.ranks.iter().map(|(module, &rank)| (module, rank))
    }

    /// Modules, highest rank first.
    pub fn modules(&self) -> impl Iterator<Item = &M> + '_ {
        self.ranks.keys()
    }

    /// Number of ranked modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    /// Whether no module was ranked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

impl<'a, M: Vertex> IntoIterator for &'a Rankings<M> {
    type Item = (&'a M, &'a u64);
    type IntoIter = indexmap::map::Iter<'a, M, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranks.iter()
    }
}

/// Ranked order expressed in node indices.
#[derive(Debug, Clone)]
pub(crate) struct RankedOrder {
    /// Node indices, highest rank first.
    pub order: Vec<NodeIndex>,
    /// Rank of each node, indexed by node index.
    pub ranks: Vec<u64>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Temporary,
    Permanent,
}

/// Computes topological order and rankings of a [`GraphModel`].
#[derive(Debug, Clone, Copy)]
pub struct RankingSorter<'a, M: Vertex> {
    graph: &'a GraphModel<M>,
}

impl<'a, M: Vertex> RankingSorter<'a, M> {
    /// Create a sorter over `graph`.
    #[must_use]
    pub fn new(graph: &'a GraphModel<M>) -> Self {
        Self { graph }
    }

    /// Producers before consumers, nodes otherwise in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CyclicGraph`] if the graph is not a DAG.
    pub fn topological_order(&self) -> Result<Vec<M>> {
        Ok(self
            .topological_indices()?
            .into_iter()
            .map(|ix| self.graph.node(ix).clone())
            .collect())
    }

    /// Rank every module using `priority` as its base.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CyclicGraph`] if the graph is not a DAG and
    /// [`Error::InvalidPriority`] for priorities above [`MAX_PRIORITY`].
    pub fn rankings(&self, priority: impl Fn(&M) -> u32) -> Result<Rankings<M>> {
        let ranked = self.ranked_order(priority)?;
        Ok(Rankings::from_ranked(self.graph, &ranked))
    }

    /// Rank every module with priority 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CyclicGraph`] if the graph is not a DAG.
    pub fn rankings_without_priority(&self) -> Result<Rankings<M>> {
        self.rankings(|_| 0)
    }

    pub(crate) fn ranked_order(&self, priority: impl Fn(&M) -> u32) -> Result<RankedOrder> {
        let topo = self.topological_indices()?;
        let mut ranks = vec![0_u64; self.graph.node_count()];

        for &ix in topo.iter().rev() {
            let module = self.graph.node(ix);
            let base = priority(module);
            if base > MAX_PRIORITY {
                return Err(Error::InvalidPriority {
                    module: module.to_string(),
                    priority: base,
                });
            }
            let longest = self
                .graph
                .successor_indices(ix)
                .iter()
                .map(|&to| u64::from(self.graph.weight(ix, to)) + ranks[to.index()])
                .max()
                .unwrap_or(0);
            ranks[ix.index()] = u64::from(base) + longest;
        }

        let mut order = topo;
        // Stable: ties keep their topological order.
        order.sort_by(|a, b| ranks[b.index()].cmp(&ranks[a.index()]));

        debug!(modules = order.len(), "Ranked dependency graph");
        Ok(RankedOrder { order, ranks })
    }

    pub(crate) fn topological_indices(&self) -> Result<Vec<NodeIndex>> {
        let node_count = self.graph.node_count();
        let mut marks = vec![Mark::Unvisited; node_count];
        let mut order = Vec::with_capacity(node_count);
        let mut stack: Vec<(NodeIndex, usize)> = Vec::new();

        for root in self.graph.inner().node_indices() {
            if marks[root.index()] != Mark::Unvisited {
                continue;
            }
            marks[root.index()] = Mark::Temporary;
            stack.push((root, 0));

            while let Some((ix, next)) = stack.last_mut() {
                let predecessors = self.graph.predecessor_indices(*ix);
                if let Some(&pred) = predecessors.get(*next) {
                    *next += 1;
                    match marks[pred.index()] {
                        Mark::Permanent => {}
                        Mark::Temporary => {
                            return Err(CycleDetector::new(self.graph).to_error());
                        }
                        Mark::Unvisited => {
                            marks[pred.index()] = Mark::Temporary;
                            stack.push((pred, 0));
                        }
                    }
                } else {
                    let done = *ix;
                    marks[done.index()] = Mark::Permanent;
                    order.push(done);
                    stack.pop();
                }
            }
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Edge;

    fn chain() -> GraphModel<&'static str> {
        GraphModel::new(
            ["c", "b", "a", "x"],
            [Edge::new("a", "b"), Edge::new("b", "c")],
        )
        .unwrap()
    }

    #[test]
    fn test_topological_order_producers_first() {
        let graph = chain();
        let order = RankingSorter::new(&graph).topological_order().unwrap();
        assert_eq!(order, ["a", "b", "c", "x"]);
    }

    #[test]
    fn test_rankings_longest_path() {
        let graph = GraphModel::new(
            ["a", "b", "c", "d"],
            [
                Edge::new("a", "b"),
                Edge::new("a", "c"),
                Edge::new("b", "d"),
                Edge::with_weight("c", "d", 5),
            ],
        )
        .unwrap();
        let rankings = RankingSorter::new(&graph).rankings_without_priority().unwrap();

        assert_eq!(rankings.get(&"d"), Some(0));
        assert_eq!(rankings.get(&"b"), Some(1));
        assert_eq!(rankings.get(&"c"), Some(5));
        assert_eq!(rankings.get(&"a"), Some(6));
        assert_eq!(
            rankings.modules().copied().collect::<Vec<_>>(),
            ["a", "c", "b", "d"]
        );
    }

    #[test]
    fn test_priority_lifts_module() {
        let graph = chain();
        let rankings = RankingSorter::new(&graph)
            .rankings(|m| if *m == "x" { 10 } else { 0 })
            .unwrap();
        assert_eq!(rankings.get(&"x"), Some(10));
        assert_eq!(rankings.get(&"a"), Some(2));
        assert_eq!(rankings.position(&"x"), Some(0));
    }

    #[test]
    fn test_ties_keep_topological_order() {
        let graph: GraphModel<&str> = GraphModel::new(["q", "p", "r"], []).unwrap();
        let rankings = RankingSorter::new(&graph).rankings_without_priority().unwrap();
        assert_eq!(
            rankings.iter().collect::<Vec<_>>(),
            [(&"q", 0), (&"p", 0), (&"r", 0)]
        );
    }

    #[test]
    fn test_invalid_priority() {
        let graph = chain();
        let err = RankingSorter::new(&graph)
            .rankings(|_| MAX_PRIORITY + 1)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPriority { .. }));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let graph = GraphModel::new(
            ["a", "b", "c"],
            [Edge::new("a", "b"), Edge::new("b", "c"), Edge::new("c", "a")],
        )
        .unwrap();
        let err = RankingSorter::new(&graph).topological_order().unwrap_err();
        assert_eq!(
            err.cycles(),
            Some(&[vec!["a".to_string(), "b".to_string(), "c".to_string()]][..])
        );
    }
}
