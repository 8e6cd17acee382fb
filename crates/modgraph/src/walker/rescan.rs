//! Rescan walker: one lock, linear search for the next ready module.

use super::{Gate, GraphWalker, Ledger, NodeState, Release};
use crate::{BoxError, DependencyGraph, ExecutionFailure, GraphModel, Result, Vertex};
use parking_lot::{Condvar, Mutex};
use petgraph::graph::NodeIndex;
use tracing::{trace, warn};

/// Walker that scans the pending modules on every release.
///
/// Everything lives behind one mutex. Each release walks the ranked order
/// and returns the first pending module whose dependencies have all
/// completed, so a release costs `O(n + e)`. Simpler than
/// [`ReadyQueueWalker`](super::ReadyQueueWalker) and handy as a reference.
#[derive(Debug)]
pub struct RescanWalker<'g, M: Vertex> {
    graph: &'g GraphModel<M>,
    order: &'g [NodeIndex],
    ledger: Mutex<Ledger>,
    changed: Condvar,
}

impl<'g, M: Vertex> RescanWalker<'g, M> {
    /// Create a walker over `graph` running at most `parallelism` modules at
    /// a time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParallelism`](crate::Error::InvalidParallelism)
    /// if `parallelism` is zero.
    pub fn new(graph: &'g DependencyGraph<M>, parallelism: usize) -> Result<Self> {
        let model = graph.graph();
        Ok(Self {
            graph: model,
            order: &graph.ranked().order,
            ledger: Mutex::new(Ledger::new(model.node_count(), parallelism)?),
            changed: Condvar::new(),
        })
    }

    fn next_ready(&self, ledger: &Ledger) -> Option<NodeIndex> {
        self.order.iter().copied().find(|&ix| {
            ledger.state(ix.index()) == NodeState::Pending
                && self
                    .graph
                    .predecessor_indices(ix)
                    .iter()
                    .all(|pred| ledger.state(pred.index()) == NodeState::Completed)
        })
    }

    fn lookup(&self, module: &M) -> Option<NodeIndex> {
        let ix = self.graph.index_of(module);
        if ix.is_none() {
            warn!(%module, "Ignoring report for module outside the graph");
        }
        ix
    }
}

impl<M: Vertex> GraphWalker<M> for RescanWalker<'_, M> {
    fn size(&self) -> usize {
        self.graph.node_count()
    }

    fn release_next(&self) -> Release<M> {
        let mut ledger = self.ledger.lock();
        loop {
            match ledger.gate() {
                Gate::Halted => return Release::Halted,
                Gate::Exhausted => return Release::Exhausted,
                Gate::Open => {
                    if let Some(ix) = self.next_ready(&ledger) {
                        ledger.start(ix.index());
                        let module = self.graph.node(ix);
                        trace!(%module, "Released module");
                        return Release::Ready(module.clone());
                    }
                }
                Gate::Saturated => {}
            }
            self.changed.wait(&mut ledger);
        }
    }

    fn on_complete(&self, module: &M) {
        let Some(ix) = self.lookup(module) else {
            return;
        };
        if self.ledger.lock().complete(ix.index(), module) {
            trace!(%module, "Module completed");
            self.changed.notify_all();
        }
    }

    fn on_failure(&self, module: &M, error: BoxError) {
        let Some(ix) = self.lookup(module) else {
            return;
        };
        self.ledger.lock().fail(ix.index(), module, error);
        self.changed.notify_all();
    }

    fn is_completed(&self) -> bool {
        self.ledger.lock().is_completed()
    }

    fn await_completion(&self) -> std::result::Result<(), ExecutionFailure> {
        let mut ledger = self.ledger.lock();
        while !ledger.is_completed() {
            self.changed.wait(&mut ledger);
        }
        ledger.take_failure().map_or(Ok(()), Err)
    }

    fn node_state(&self, module: &M) -> Option<NodeState> {
        let ix = self.graph.index_of(module)?;
        Some(self.ledger.lock().state(ix.index()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Descriptor, GraphBuilder};

    fn graph() -> DependencyGraph<&'static str> {
        let mut builder = GraphBuilder::new();
        for entry in [
            Descriptor::builder("x"),
            Descriptor::builder("a").execution_priority(5),
            Descriptor::builder("b").requires("a"),
        ] {
            let descriptor = entry.build().unwrap();
            builder.add(*descriptor.key(), descriptor);
        }
        DependencyGraph::from_builder(builder).unwrap()
    }

    #[test]
    fn test_follows_ranked_order() {
        let graph = graph();
        let walker = RescanWalker::new(&graph, 1).unwrap();

        // a: 5 + 1, x: 0, b: 0
        assert_eq!(walker.release_next(), Release::Ready("a"));
        walker.on_complete(&"a");
        assert_eq!(walker.release_next(), Release::Ready("x"));
        walker.on_complete(&"x");
        assert_eq!(walker.release_next(), Release::Ready("b"));
        walker.on_complete(&"b");

        assert_eq!(walker.release_next(), Release::Exhausted);
        assert!(walker.await_completion().is_ok());
    }

    #[test]
    fn test_running_module_finishes_after_failure() {
        let graph = graph();
        let walker = RescanWalker::new(&graph, 2).unwrap();

        assert_eq!(walker.release_next(), Release::Ready("a"));
        assert_eq!(walker.release_next(), Release::Ready("x"));
        walker.on_failure(&"a", "boom".into());
        assert!(!walker.is_completed());
        assert_eq!(walker.release_next(), Release::Halted);

        walker.on_complete(&"x");
        assert!(walker.is_completed());
        assert_eq!(walker.node_state(&"b"), Some(NodeState::Pending));
        assert_eq!(walker.await_completion().unwrap_err().node, "a");
    }
}
