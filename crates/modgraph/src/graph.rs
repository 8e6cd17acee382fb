//! Dependency graph facade.
//!
//! Composes builder, cycle check and ranking at construction time and
//! offers the query and execution surface used by callers.

use crate::ranking::RankedOrder;
use crate::{
    BoxError, ConsumerPanic, CycleDetector, Describe, Error, ExecutionFailure, GraphBuilder,
    GraphModel, GraphWalker, Key, ModuleConsumer, NodeState, RankingSorter, Rankings,
    ReadyQueueWalker, Release, RescanWalker, Result, Vertex, WalkConfig, WalkerKind,
};
use indexmap::IndexSet;
use petgraph::graph::NodeIndex;
use rayon::ThreadPool;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info_span, trace};

/// A validated, ranked dependency graph.
///
/// The graph, its rankings and its topological order are computed once and
/// never change. Transitive dependencies are computed on first use and
/// cached for the lifetime of the graph.
pub struct DependencyGraph<M: Vertex> {
    graph: GraphModel<M>,
    ranked: RankedOrder,
    rankings: Rankings<M>,
    order: Vec<M>,
    closures: Vec<OnceLock<IndexSet<M>>>,
    closure_computations: AtomicUsize,
}

impl<M: Vertex> DependencyGraph<M> {
    /// Build from modules that carry their own descriptor.
    ///
    /// # Errors
    ///
    /// Fails on unsatisfied dependencies, cycles or invalid priorities.
    pub fn from_modules(modules: impl IntoIterator<Item = M>) -> Result<Self>
    where
        M: Describe,
    {
        Self::from_builder(GraphBuilder::from_modules(modules))
    }

    /// Build from a populated [`GraphBuilder`].
    ///
    /// # Errors
    ///
    /// Fails on unsatisfied dependencies, cycles or invalid priorities.
    pub fn from_builder<K: Key>(builder: GraphBuilder<M, K>) -> Result<Self> {
        let graph = builder.build()?;
        Self::from_graph(graph, &builder.priorities())
    }

    /// Wrap an existing graph. Modules missing from `priorities` get 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CyclicGraph`] if the graph is not a DAG and
    /// [`Error::InvalidPriority`] for out-of-range priorities.
    pub fn from_graph(graph: GraphModel<M>, priorities: &HashMap<M, u32>) -> Result<Self> {
        CycleDetector::new(&graph).check()?;

        let ranked = RankingSorter::new(&graph)
            .ranked_order(|module| priorities.get(module).copied().unwrap_or(0))?;
        let rankings = Rankings::from_ranked(&graph, &ranked);
        let order = ranked
            .order
            .iter()
            .map(|&ix| graph.node(ix).clone())
            .collect();
        let closures = (0..graph.node_count()).map(|_| OnceLock::new()).collect();

        debug!(
            modules = graph.node_count(),
            edges = graph.edge_count(),
            "Dependency graph ready"
        );

        Ok(Self {
            graph,
            ranked,
            rankings,
            order,
            closures,
            closure_computations: AtomicUsize::new(0),
        })
    }

    /// The underlying graph.
    #[must_use]
    pub fn graph(&self) -> &GraphModel<M> {
        &self.graph
    }

    /// All modules in insertion order.
    pub fn modules(&self) -> impl Iterator<Item = &M> + '_ {
        self.graph.nodes()
    }

    /// Modules ordered by rank, highest first. Producers precede consumers.
    #[must_use]
    pub fn topological_order(&self) -> &[M] {
        &self.order
    }

    /// Rank of every module.
    #[must_use]
    pub fn module_rankings(&self) -> &Rankings<M> {
        &self.rankings
    }

    /// Rank of `module`.
    #[must_use]
    pub fn rank(&self, module: &M) -> Option<u64> {
        self.rankings.get(module)
    }

    /// Modules `module` depends on directly.
    pub fn direct_dependencies<'a>(
        &'a self,
        module: &M,
    ) -> impl Iterator<Item = &'a M> + use<'a, M> {
        self.graph.predecessors(module)
    }

    /// Every module `module` depends on, directly or transitively, in
    /// topological order.
    ///
    /// Computed once per module, even with concurrent callers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownNode`] if `module` is not part of the graph.
    pub fn all_dependencies(&self, module: &M) -> Result<&IndexSet<M>> {
        let ix = self
            .graph
            .index_of(module)
            .ok_or_else(|| Error::unknown_node(module))?;
        Ok(self.closure(ix))
    }

    fn closure(&self, ix: NodeIndex) -> &IndexSet<M> {
        self.closures[ix.index()].get_or_init(|| {
            self.closure_computations.fetch_add(1, Ordering::Relaxed);

            // Explicit stack: chains may be thousands of modules deep.
            // Ancestors whose closure is already cached are not descended.
            let mut members: HashSet<NodeIndex> = HashSet::new();
            let mut stack: Vec<NodeIndex> = self.graph.predecessor_indices(ix).to_vec();
            while let Some(next) = stack.pop() {
                if !members.insert(next) {
                    continue;
                }
                if let Some(known) = self.closures[next.index()].get() {
                    members.extend(known.iter().filter_map(|m| self.graph.index_of(m)));
                } else {
                    stack.extend(
                        self.graph
                            .predecessor_indices(next)
                            .iter()
                            .filter(|pred| !members.contains(*pred)),
                    );
                }
            }

            let mut members: Vec<NodeIndex> = members.into_iter().collect();
            members.sort_by_key(|m| self.position(*m));
            trace!(
                module = %self.graph.node(ix),
                dependencies = members.len(),
                "Computed transitive dependencies"
            );
            members
                .into_iter()
                .map(|m| self.graph.node(m).clone())
                .collect()
        })
    }

    fn position(&self, ix: NodeIndex) -> usize {
        self.rankings
            .position(self.graph.node(ix))
            .unwrap_or(usize::MAX)
    }

    /// Number of transitive closures computed so far.
    pub(crate) fn closure_computations(&self) -> usize {
        self.closure_computations.load(Ordering::Relaxed)
    }

    /// Number of modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no modules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub(crate) fn ranked(&self) -> &RankedOrder {
        &self.ranked
    }

    /// Create the walker selected by `config` for a pool with
    /// `pool_threads` threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParallelism`] if no permit would be available.
    pub fn walker(
        &self,
        config: &WalkConfig,
        pool_threads: usize,
    ) -> Result<Box<dyn GraphWalker<M> + '_>> {
        let parallelism = config.effective_parallelism(pool_threads);
        let walker: Box<dyn GraphWalker<M> + '_> = match config.walker {
            WalkerKind::ReadyQueue => Box::new(ReadyQueueWalker::new(self, parallelism)?),
            WalkerKind::Rescan => Box::new(RescanWalker::new(self, parallelism)?),
        };
        Ok(walker)
    }

    /// Process every module on `pool`, never before its dependencies.
    ///
    /// Uses the default [`WalkConfig`]: the ready-queue walker bounded by the
    /// pool's thread count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Execution`] with the first failing module.
    pub fn walk_graph<C>(&self, pool: &ThreadPool, consumer: C) -> Result<()>
    where
        C: ModuleConsumer<M> + Sync,
    {
        self.walk_graph_with(pool, &WalkConfig::default(), consumer)
    }

    /// Process every module on `pool` using the walker described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParallelism`] for an unusable configuration
    /// and [`Error::Execution`] with the first failing module.
    pub fn walk_graph_with<C>(
        &self,
        pool: &ThreadPool,
        config: &WalkConfig,
        consumer: C,
    ) -> Result<()>
    where
        C: ModuleConsumer<M> + Sync,
    {
        let walker = self.walker(config, pool.current_num_threads())?;
        debug!(walker = %config.walker, "Walking dependency graph");
        self.walk_with(pool, walker.as_ref(), consumer)
    }

    /// Drive `walker` to completion, running the consumer on `pool`.
    ///
    /// The calling thread coordinates: it releases modules and hands them to
    /// the pool, then waits until the walk is complete. It must not be a
    /// worker thread of `pool`.
    ///
    /// A panicking consumer is reported as a failure of its module. A walker
    /// serves exactly one walk: it must be fresh and built for this graph.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleWalker`] for a walker that already released a
    /// module or tracks other modules, and [`Error::Execution`] with the
    /// first failing module.
    pub fn walk_with<C>(
        &self,
        pool: &ThreadPool,
        walker: &dyn GraphWalker<M>,
        consumer: C,
    ) -> Result<()>
    where
        C: ModuleConsumer<M> + Sync,
    {
        let fresh = walker.size() == self.len()
            && self
                .graph
                .nodes()
                .all(|module| walker.node_state(module) == Some(NodeState::Pending));
        if !fresh {
            return Err(Error::StaleWalker);
        }

        let span = info_span!("walk_graph", modules = walker.size());
        let _enter = span.enter();
        let consumer = &consumer;

        pool.in_place_scope(|scope| {
            loop {
                match walker.release_next() {
                    Release::Ready(module) => {
                        scope.spawn(move |_| match run_consumer(consumer, &module) {
                            Ok(()) => walker.on_complete(&module),
                            Err(error) => walker.on_failure(&module, error),
                        });
                    }
                    Release::Exhausted => break,
                    Release::Halted => {
                        debug!("Walk halted, waiting for running modules");
                        break;
                    }
                }
            }
            walker.await_completion()
        })?;

        debug!("Walk completed");
        Ok(())
    }

    /// Process every module on the calling thread in topological order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing module and returns [`Error::Execution`].
    pub fn iterate_topo_order<C>(&self, consumer: C) -> Result<()>
    where
        C: ModuleConsumer<M>,
    {
        for module in &self.order {
            trace!(%module, "Processing module");
            consumer
                .process(module)
                .map_err(|source| ExecutionFailure::new(module, source))?;
        }
        Ok(())
    }
}

impl<M: Vertex> fmt::Debug for DependencyGraph<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("modules", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish_non_exhaustive()
    }
}

fn run_consumer<M, C: ModuleConsumer<M>>(
    consumer: &C,
    module: &M,
) -> std::result::Result<(), BoxError> {
    panic::catch_unwind(AssertUnwindSafe(|| consumer.process(module)))
        .unwrap_or_else(|payload| Err(panic_message(payload.as_ref()).into()))
}

fn panic_message(payload: &(dyn Any + Send)) -> ConsumerPanic {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    ConsumerPanic { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Descriptor;
    use std::sync::Mutex;

    fn build(entries: Vec<crate::DescriptorBuilder<&'static str>>) -> DependencyGraph<&'static str> {
        let mut builder = GraphBuilder::new();
        for entry in entries {
            let descriptor = entry.build().unwrap();
            builder.add(*descriptor.key(), descriptor);
        }
        DependencyGraph::from_builder(builder).unwrap()
    }

    fn diamond() -> DependencyGraph<&'static str> {
        build(vec![
            Descriptor::builder("a"),
            Descriptor::builder("b").requires("a"),
            Descriptor::builder("c").requires("a"),
            Descriptor::builder("d").requires("b").requires("c"),
            Descriptor::builder("e").requires("d"),
        ])
    }

    fn pool(threads: usize) -> ThreadPool {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap()
    }

    #[test]
    fn test_queries() {
        let graph = diamond();
        assert_eq!(graph.len(), 5);
        assert!(!graph.is_empty());
        assert_eq!(graph.topological_order(), ["a", "b", "c", "d", "e"]);
        assert_eq!(graph.rank(&"a"), Some(3));
        assert_eq!(graph.rank(&"e"), Some(0));
        assert_eq!(
            graph.direct_dependencies(&"d").copied().collect::<Vec<_>>(),
            ["b", "c"]
        );
    }

    #[test]
    fn test_all_dependencies_in_topological_order() {
        let graph = diamond();
        let deps = graph.all_dependencies(&"e").unwrap();
        assert_eq!(deps.iter().copied().collect::<Vec<_>>(), ["a", "b", "c", "d"]);
        assert!(graph.all_dependencies(&"a").unwrap().is_empty());
        assert!(matches!(
            graph.all_dependencies(&"zzz"),
            Err(Error::UnknownNode { .. })
        ));
    }

    #[test]
    fn test_all_dependencies_computed_once() {
        let graph = diamond();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let deps = graph.all_dependencies(&"e").unwrap();
                    assert_eq!(deps.len(), 4);
                });
            }
        });
        assert_eq!(graph.closure_computations(), 1);

        let again = graph.all_dependencies(&"d").unwrap();
        assert_eq!(again.len(), 3);
        assert_eq!(graph.closure_computations(), 2);

        // Cached results are reused, not recomputed.
        graph.all_dependencies(&"e").unwrap();
        graph.all_dependencies(&"d").unwrap();
        assert_eq!(graph.closure_computations(), 2);
    }

    #[test]
    fn test_closure_reuses_cached_ancestors() {
        let graph = diamond();
        let d = graph.all_dependencies(&"d").unwrap().clone();
        let e = graph.all_dependencies(&"e").unwrap();
        assert!(d.is_subset(e));
        assert_eq!(e.iter().copied().collect::<Vec<_>>(), ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_cyclic_graph_is_rejected() {
        let mut builder = GraphBuilder::new();
        for entry in [
            Descriptor::builder("k").requires("l"),
            Descriptor::builder("l").requires("k"),
        ] {
            let descriptor = entry.build().unwrap();
            builder.add(*descriptor.key(), descriptor);
        }
        let err = DependencyGraph::from_builder(builder).unwrap_err();
        assert_eq!(err.cycles().map(<[_]>::len), Some(1));
    }

    #[test]
    fn test_iterate_topo_order() {
        let graph = diamond();
        let seen = Mutex::new(Vec::new());
        graph
            .iterate_topo_order(|module: &&'static str| {
                seen.lock().unwrap().push(*module);
                Ok::<_, BoxError>(())
            })
            .unwrap();
        assert_eq!(seen.into_inner().unwrap(), graph.topological_order());
    }

    #[test]
    fn test_iterate_topo_order_stops_at_failure() {
        let graph = diamond();
        let seen = Mutex::new(Vec::new());
        let err = graph
            .iterate_topo_order(|module: &&'static str| {
                seen.lock().unwrap().push(*module);
                if *module == "b" {
                    return Err(BoxError::from("broken"));
                }
                Ok::<_, BoxError>(())
            })
            .unwrap_err();

        assert_eq!(seen.into_inner().unwrap(), ["a", "b"]);
        match err {
            Error::Execution(failure) => assert_eq!(failure.node, "b"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_walk_graph_respects_dependencies() {
        let graph = diamond();
        let pool = pool(4);
        let finished = Mutex::new(Vec::new());

        graph
            .walk_graph(&pool, |module: &&'static str| {
                let done = finished.lock().unwrap();
                for dep in graph.direct_dependencies(module) {
                    assert!(done.contains(dep), "{module} started before {dep}");
                }
                drop(done);
                finished.lock().unwrap().push(*module);
                Ok::<_, BoxError>(())
            })
            .unwrap();

        assert_eq!(finished.into_inner().unwrap().len(), 5);
    }

    #[test]
    fn test_walk_graph_reports_panic() {
        let graph = diamond();
        let pool = pool(2);
        let err = graph
            .walk_graph(&pool, |module: &&'static str| {
                assert_ne!(*module, "c", "c is broken");
                Ok::<_, BoxError>(())
            })
            .unwrap_err();

        match err {
            Error::Execution(failure) => {
                assert_eq!(failure.node, "c");
                assert!(failure.source.is::<ConsumerPanic>());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_walk_empty_graph() {
        let graph = build(Vec::new());
        assert!(graph.is_empty());
        graph
            .walk_graph(&pool(1), |_: &&'static str| Ok::<_, BoxError>(()))
            .unwrap();
    }
}
