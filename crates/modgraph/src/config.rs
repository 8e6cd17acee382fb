//! Walk configuration
//!
//! Selects the walker backend and the parallelism bound used by
//! [`DependencyGraph::walk_graph_with`](crate::DependencyGraph::walk_graph_with).

use serde::Deserialize;
use std::fmt;

/// Scheduler backend used for a walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WalkerKind {
    /// Unmet-dependency counters and a rank-ordered ready queue
    #[default]
    ReadyQueue,
    /// Linear rescan of the pending modules on every release
    Rescan,
}

impl fmt::Display for WalkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadyQueue => f.write_str("ready-queue"),
            Self::Rescan => f.write_str("rescan"),
        }
    }
}

/// Configuration for a parallel walk
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WalkConfig {
    /// Maximum modules processed at once (0 = number of pool threads)
    pub parallelism: usize,

    /// Scheduler backend
    pub walker: WalkerKind,
}

impl WalkConfig {
    /// Set the parallelism bound
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the scheduler backend
    #[must_use]
    pub fn with_walker(mut self, walker: WalkerKind) -> Self {
        self.walker = walker;
        self
    }

    /// Parallelism to use on a pool with `pool_threads` threads
    #[must_use]
    pub fn effective_parallelism(&self, pool_threads: usize) -> usize {
        if self.parallelism == 0 {
            pool_threads.max(1)
        } else {
            self.parallelism
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WalkConfig::default();
        assert_eq!(config.parallelism, 0);
        assert_eq!(config.walker, WalkerKind::ReadyQueue);
        assert_eq!(config.effective_parallelism(8), 8);
        assert_eq!(config.effective_parallelism(0), 1);
    }

    #[test]
    fn test_builder_methods() {
        let config = WalkConfig::default()
            .with_parallelism(3)
            .with_walker(WalkerKind::Rescan);
        assert_eq!(config.effective_parallelism(8), 3);
        assert_eq!(config.walker.to_string(), "rescan");
    }
}
