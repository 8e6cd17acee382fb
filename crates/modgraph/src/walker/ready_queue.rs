//! Ready-queue walker.
//!
//! Each module keeps a count of unfinished dependencies. When it drops to
//! zero the module enters a heap ordered by rank, so releasing is
//! `O(log n)` and completing costs `O(out-degree)`.

use super::{Gate, GraphWalker, Ledger, NodeState, Release};
use crate::{BoxError, DependencyGraph, ExecutionFailure, GraphModel, Result, Vertex};
use parking_lot::{Condvar, Mutex};
use petgraph::graph::NodeIndex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use tracing::{trace, warn};

/// Entry of the ready queue: higher rank first, then earlier ranked position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ready {
    rank: u64,
    position: Reverse<usize>,
    node: NodeIndex,
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .cmp(&other.rank)
            .then_with(|| self.position.cmp(&other.position))
    }
}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct State {
    ledger: Ledger,
    unmet: Vec<usize>,
    ready: BinaryHeap<Ready>,
}

/// Walker tracking unmet dependencies per module.
///
/// Completing a module decrements the counters of its dependents; those
/// reaching zero join a queue ordered by rank, so the module blocking the
/// most work is released first. Release is `O(log n)` and completion is
/// `O(out-degree)`.
#[derive(Debug)]
pub struct ReadyQueueWalker<'g, M: Vertex> {
    graph: &'g GraphModel<M>,
    ranks: &'g [u64],
    positions: Vec<usize>,
    state: Mutex<State>,
    changed: Condvar,
}

impl<'g, M: Vertex> ReadyQueueWalker<'g, M> {
    /// Create a walker over `graph` running at most `parallelism` modules at
    /// a time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParallelism`](crate::Error::InvalidParallelism)
    /// if `parallelism` is zero.
    pub fn new(graph: &'g DependencyGraph<M>, parallelism: usize) -> Result<Self> {
        let model = graph.graph();
        let ranked = graph.ranked();
        let ledger = Ledger::new(model.node_count(), parallelism)?;

        let mut positions = vec![0; model.node_count()];
        for (position, ix) in ranked.order.iter().enumerate() {
            positions[ix.index()] = position;
        }

        let unmet: Vec<usize> = model
            .inner()
            .node_indices()
            .map(|ix| model.predecessor_indices(ix).len())
            .collect();

        let mut walker = Self {
            graph: model,
            ranks: &ranked.ranks,
            positions,
            state: Mutex::new(State {
                ledger,
                unmet: Vec::new(),
                ready: BinaryHeap::new(),
            }),
            changed: Condvar::new(),
        };

        let ready = ranked
            .order
            .iter()
            .filter(|ix| unmet[ix.index()] == 0)
            .map(|&ix| walker.entry(ix))
            .collect();
        let state = walker.state.get_mut();
        state.unmet = unmet;
        state.ready = ready;

        Ok(walker)
    }

    fn entry(&self, node: NodeIndex) -> Ready {
        Ready {
            rank: self.ranks[node.index()],
            position: Reverse(self.positions[node.index()]),
            node,
        }
    }

    fn lookup(&self, module: &M) -> Option<NodeIndex> {
        let ix = self.graph.index_of(module);
        if ix.is_none() {
            warn!(%module, "Ignoring report for module outside the graph");
        }
        ix
    }
}

impl<M: Vertex> GraphWalker<M> for ReadyQueueWalker<'_, M> {
    fn size(&self) -> usize {
        self.graph.node_count()
    }

    fn release_next(&self) -> Release<M> {
        let mut state = self.state.lock();
        loop {
            match state.ledger.gate() {
                Gate::Halted => return Release::Halted,
                Gate::Exhausted => return Release::Exhausted,
                Gate::Open => {
                    if let Some(Ready { node, rank, .. }) = state.ready.pop() {
                        state.ledger.start(node.index());
                        let module = self.graph.node(node);
                        trace!(%module, rank, "Released module");
                        return Release::Ready(module.clone());
                    }
                }
                Gate::Saturated => {}
            }
            self.changed.wait(&mut state);
        }
    }

    fn on_complete(&self, module: &M) {
        let Some(ix) = self.lookup(module) else {
            return;
        };
        let mut state = self.state.lock();
        if !state.ledger.complete(ix.index(), module) {
            return;
        }
        trace!(%module, "Module completed");

        if !state.ledger.is_halted() {
            for &successor in self.graph.successor_indices(ix) {
                let unmet = &mut state.unmet[successor.index()];
                *unmet -= 1;
                if *unmet == 0 {
                    let entry = self.entry(successor);
                    state.ready.push(entry);
                }
            }
        }
        drop(state);
        self.changed.notify_all();
    }

    fn on_failure(&self, module: &M, error: BoxError) {
        let Some(ix) = self.lookup(module) else {
            return;
        };
        self.state.lock().ledger.fail(ix.index(), module, error);
        self.changed.notify_all();
    }

    fn is_completed(&self) -> bool {
        self.state.lock().ledger.is_completed()
    }

    fn await_completion(&self) -> std::result::Result<(), ExecutionFailure> {
        let mut state = self.state.lock();
        while !state.ledger.is_completed() {
            self.changed.wait(&mut state);
        }
        state.ledger.take_failure().map_or(Ok(()), Err)
    }

    fn node_state(&self, module: &M) -> Option<NodeState> {
        let ix = self.graph.index_of(module)?;
        Some(self.state.lock().ledger.state(ix.index()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Descriptor, GraphBuilder};

    fn graph() -> DependencyGraph<&'static str> {
        let mut builder = GraphBuilder::new();
        for entry in [
            Descriptor::builder("a"),
            Descriptor::builder("b").requires("a"),
            Descriptor::builder("c").requires("a"),
            Descriptor::builder("d").requires("b").requires("c"),
        ] {
            let descriptor = entry.build().unwrap();
            builder.add(*descriptor.key(), descriptor);
        }
        DependencyGraph::from_builder(builder).unwrap()
    }

    #[test]
    fn test_releases_in_dependency_order() {
        let graph = graph();
        let walker = ReadyQueueWalker::new(&graph, 2).unwrap();
        assert_eq!(walker.size(), 4);

        assert_eq!(walker.release_next(), Release::Ready("a"));
        assert_eq!(walker.node_state(&"a"), Some(NodeState::Running));
        walker.on_complete(&"a");

        let first = walker.release_next();
        let second = walker.release_next();
        let mut released = [first, second];
        released.sort_by_key(|r| format!("{r:?}"));
        assert_eq!(released, [Release::Ready("b"), Release::Ready("c")]);
        assert_eq!(walker.node_state(&"d"), Some(NodeState::Pending));

        walker.on_complete(&"b");
        walker.on_complete(&"c");
        assert_eq!(walker.release_next(), Release::Ready("d"));
        assert_eq!(walker.release_next(), Release::Exhausted);
        assert!(!walker.is_completed());

        walker.on_complete(&"d");
        assert!(walker.is_completed());
        assert!(walker.await_completion().is_ok());
    }

    #[test]
    fn test_failure_halts_release() {
        let graph = graph();
        let walker = ReadyQueueWalker::new(&graph, 4).unwrap();

        assert_eq!(walker.release_next(), Release::Ready("a"));
        walker.on_failure(&"a", "boom".into());

        assert_eq!(walker.release_next(), Release::Halted);
        assert!(walker.is_completed());
        assert_eq!(walker.node_state(&"a"), Some(NodeState::Failed));
        assert_eq!(walker.node_state(&"b"), Some(NodeState::Pending));

        let failure = walker.await_completion().unwrap_err();
        assert_eq!(failure.node, "a");
        assert!(walker.await_completion().is_ok());
    }

    #[test]
    fn test_duplicate_completion_is_ignored() {
        let graph = graph();
        let walker = ReadyQueueWalker::new(&graph, 1).unwrap();

        assert_eq!(walker.release_next(), Release::Ready("a"));
        walker.on_complete(&"a");
        walker.on_complete(&"a");
        walker.on_complete(&"zzz");
        assert_eq!(walker.node_state(&"a"), Some(NodeState::Completed));
        assert!(matches!(walker.release_next(), Release::Ready("b" | "c")));
    }

    #[test]
    fn test_zero_parallelism() {
        let graph = graph();
        assert!(ReadyQueueWalker::new(&graph, 0).is_err());
    }
}
