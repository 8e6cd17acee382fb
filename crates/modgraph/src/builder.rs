//! Graph construction from dependency descriptors.
//!
//! Every module is indexed as a consumer of its required and optional keys
//! and as a producer of its provided keys. Each (producer, consumer) pair
//! sharing a key becomes an edge `producer -> consumer`.

use crate::{Describe, Descriptor, Edge, Error, GraphModel, Key, Result, Vertex};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Collects modules with their descriptors and builds a [`GraphModel`].
#[derive(Debug, Clone)]
pub struct GraphBuilder<M: Vertex, K: Key> {
    modules: IndexMap<M, Descriptor<K>>,
}

impl<M: Vertex, K: Key> GraphBuilder<M, K> {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            modules: IndexMap::new(),
        }
    }

    /// Add a module with its descriptor.
    ///
    /// Adding the same module twice replaces its descriptor.
    pub fn add(&mut self, module: M, descriptor: Descriptor<K>) -> &mut Self {
        if self.modules.insert(module.clone(), descriptor).is_some() {
            debug!(module = %module, "Replaced descriptor of module");
        }
        self
    }

    /// Create a builder from modules that carry their own descriptor.
    pub fn from_modules(modules: impl IntoIterator<Item = M>) -> Self
    where
        M: Describe<Key = K>,
    {
        let mut builder = Self::new();
        for module in modules {
            let descriptor = module.descriptor().clone();
            builder.add(module, descriptor);
        }
        builder
    }

    /// Number of modules added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Execution priority of every module.
    #[must_use]
    pub fn priorities(&self) -> HashMap<M, u32> {
        self.modules
            .iter()
            .map(|(module, descriptor)| (module.clone(), descriptor.priority()))
            .collect()
    }

    /// Match producers to consumers and build the graph.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsatisfiedDependency`] for the first required key
    /// without a producer. No partial graph is returned.
    pub fn build(&self) -> Result<GraphModel<M>> {
        let mut consumers: IndexMap<&K, IndexSet<&M>> = IndexMap::new();
        let mut optional_consumers: IndexMap<&K, IndexSet<&M>> = IndexMap::new();
        let mut producers: HashMap<&K, IndexSet<&M>> = HashMap::new();

        for (module, descriptor) in &self.modules {
            for key in descriptor.required() {
                consumers.entry(key).or_default().insert(module);
            }
            for key in descriptor.optional() {
                optional_consumers.entry(key).or_default().insert(module);
            }
            for key in descriptor.providers() {
                producers.entry(key).or_default().insert(module);
            }
        }

        let no_producers = IndexSet::new();
        let mut keys: IndexSet<&K> = consumers.keys().copied().collect();
        keys.extend(optional_consumers.keys().copied());

        let mut edges = Vec::new();
        for key in keys {
            let from = producers.get(key).unwrap_or(&no_producers);

            if let Some(targets) = consumers.get(key) {
                for &target in targets {
                    if from.is_empty() {
                        return Err(Error::unsatisfied(target, key));
                    }
                    for &source in from {
                        if source != target {
                            trace!(key = ?key, %source, %target, "Required dependency edge");
                            edges.push(Edge::new(source.clone(), target.clone()));
                        }
                    }
                }
            }

            if let Some(targets) = optional_consumers.get(key) {
                if from.is_empty() {
                    trace!(key = ?key, "Optional dependency has no provider");
                }
                for &target in targets {
                    for &source in from {
                        if source != target {
                            trace!(key = ?key, %source, %target, "Optional dependency edge");
                            edges.push(Edge::new(source.clone(), target.clone()));
                        }
                    }
                }
            }
        }

        let graph = GraphModel::new(self.modules.keys().cloned(), edges)?;
        debug!(
            modules = graph.node_count(),
            edges = graph.edge_count(),
            "Built dependency graph"
        );
        Ok(graph)
    }
}

impl<M: Vertex, K: Key> Default for GraphBuilder<M, K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &'static str) -> crate::DescriptorBuilder<&'static str> {
        Descriptor::builder(name)
    }

    fn build(entries: Vec<crate::DescriptorBuilder<&'static str>>) -> Result<GraphModel<&'static str>> {
        let mut builder = GraphBuilder::new();
        for entry in entries {
            let descriptor = entry.build()?;
            builder.add(*descriptor.key(), descriptor);
        }
        builder.build()
    }

    fn has_edge(graph: &GraphModel<&'static str>, from: &'static str, to: &'static str) -> bool {
        graph.successors(&from).any(|m| *m == to) && graph.predecessors(&to).any(|m| *m == from)
    }

    #[test]
    fn test_required_dependency_edges() {
        let graph = build(vec![
            module("a"),
            module("b").requires("a"),
            module("c").requires("a").requires("b"),
        ])
        .unwrap();

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert!(has_edge(&graph, "a", "b"));
        assert!(has_edge(&graph, "a", "c"));
        assert!(has_edge(&graph, "b", "c"));
    }

    #[test]
    fn test_multiple_producers_for_one_key() {
        let graph = build(vec![
            module("a"),
            module("j").provides("a"),
            module("b").requires("a"),
        ])
        .unwrap();

        assert!(has_edge(&graph, "a", "b"));
        assert!(has_edge(&graph, "j", "b"));
        assert!(!has_edge(&graph, "a", "j"));
    }

    #[test]
    fn test_unsatisfied_dependency() {
        let err = build(vec![module("a"), module("b").requires("missing")]).unwrap_err();
        match err {
            Error::UnsatisfiedDependency { module, key } => {
                assert_eq!(module, "b");
                assert_eq!(key, "missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_optional_dependency_without_provider_is_skipped() {
        let graph = build(vec![module("a").requires_optionally("missing")]).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_optional_dependency_creates_edge() {
        let graph = build(vec![module("a").requires_optionally("m"), module("m")]).unwrap();
        assert!(has_edge(&graph, "m", "a"));
    }

    #[test]
    fn test_self_use_produces_no_edge() {
        let graph = build(vec![module("a").requires("m").provides("m")]).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_priorities_are_collected() {
        let mut builder = GraphBuilder::new();
        builder
            .add("a", module("a").execution_priority(7).build().unwrap())
            .add("b", module("b").build().unwrap());
        let priorities = builder.priorities();
        assert_eq!(priorities[&"a"], 7);
        assert_eq!(priorities[&"b"], 0);
        assert_eq!(builder.len(), 2);
    }
}
