//! Text renderings of a dependency graph for consoles and logs.

use crate::{DependencyGraph, Vertex};
use std::collections::HashSet;
use std::fmt;
use tracing::Level;

/// Lists every module with its rank, in topological order.
///
/// Modules without dependencies are marked with `*`: they can start right
/// away.
#[derive(Debug, Clone, Copy)]
pub struct ModuleRankingsPrinter<'a, M: Vertex> {
    graph: &'a DependencyGraph<M>,
}

impl<'a, M: Vertex> ModuleRankingsPrinter<'a, M> {
    const HEADER: &'static str = "Module Rankings";

    /// Create a printer for `graph`.
    #[must_use]
    pub fn new(graph: &'a DependencyGraph<M>) -> Self {
        Self { graph }
    }

    /// One line per module, without the header.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.graph
            .topological_order()
            .iter()
            .map(|module| {
                let marker = if self.graph.graph().has_predecessors(module) {
                    ' '
                } else {
                    '*'
                };
                let rank = self.graph.rank(module).unwrap_or_default();
                format!("{marker} {module} ({rank})")
            })
            .collect()
    }

    /// Emit the header and every line as a tracing event at `level`.
    pub fn log(&self, level: Level) {
        log_lines(level, Self::HEADER, &self.lines());
    }
}

impl<M: Vertex> fmt::Display for ModuleRankingsPrinter<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_lines(f, Self::HEADER, &self.lines())
    }
}

/// Draws the dependency tree below every module nothing depends on.
///
/// With transitive filtering (the default) a subtree is drawn once; later
/// occurrences are collapsed into a single "skipped" line.
#[derive(Debug, Clone, Copy)]
pub struct DependencyTreePrinter<'a, M: Vertex> {
    graph: &'a DependencyGraph<M>,
    filter_transitive: bool,
}

impl<'a, M: Vertex> DependencyTreePrinter<'a, M> {
    const HEADER: &'static str = "Dependency tree";

    /// Create a printer for `graph` that collapses repeated subtrees.
    #[must_use]
    pub fn new(graph: &'a DependencyGraph<M>) -> Self {
        Self {
            graph,
            filter_transitive: true,
        }
    }

    /// Enable or disable collapsing of repeated subtrees.
    #[must_use]
    pub fn with_filter_transitive(mut self, filter_transitive: bool) -> Self {
        self.filter_transitive = filter_transitive;
        self
    }

    /// The rendered tree, without the header.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut visited = HashSet::new();
        let mut steps = Vec::new();
        let roots = self
            .graph
            .topological_order()
            .iter()
            .filter(|module| !self.graph.graph().has_successors(module));
        for root in roots {
            lines.push(self.line(root, "", ""));
            steps.push(Step::Visit {
                module: root,
                prefix: String::new(),
            });
            while let Some(step) = steps.pop() {
                match step {
                    Step::Line(line) => lines.push(line),
                    Step::Visit { module, prefix } => {
                        self.visit(&mut lines, &mut steps, module, &prefix, &mut visited);
                    }
                }
            }
        }
        lines
    }

    /// Schedule the branches below `module`, or collapse them when the
    /// subtree was drawn before.
    fn visit(
        &self,
        lines: &mut Vec<String>,
        steps: &mut Vec<Step<'a, M>>,
        module: &'a M,
        prefix: &str,
        visited: &mut HashSet<&'a M>,
    ) {
        let dependencies: Vec<&'a M> = self.graph.direct_dependencies(module).collect();

        if self.filter_transitive && !dependencies.is_empty() && visited.contains(module) {
            let count = self
                .graph
                .all_dependencies(module)
                .map_or(dependencies.len(), |all| all.len());
            if count > 1 {
                lines.push(format!("{prefix} \\- ... (skipped {count} other dependencies)"));
            } else {
                lines.push(self.line(dependencies[0], prefix, " \\- "));
            }
            return;
        }

        visited.insert(module);
        let last = dependencies.len().saturating_sub(1);
        // Pushed in reverse: each branch line pops right before its subtree.
        for (i, dependency) in dependencies.into_iter().enumerate().rev() {
            let (branch, indent) = if i == last {
                (" \\- ", "   ")
            } else {
                (" +- ", " | ")
            };
            steps.push(Step::Visit {
                module: dependency,
                prefix: format!("{prefix}{indent}"),
            });
            steps.push(Step::Line(self.line(dependency, prefix, branch)));
        }
    }

    fn line(&self, module: &M, prefix: &str, branch: &str) -> String {
        let rank = self.graph.rank(module).unwrap_or_default();
        format!("{prefix}{branch}{module} ({rank})")
    }

    /// Emit the header and every line as a tracing event at `level`.
    pub fn log(&self, level: Level) {
        log_lines(level, Self::HEADER, &self.lines());
    }
}

impl<M: Vertex> fmt::Display for DependencyTreePrinter<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_lines(f, Self::HEADER, &self.lines())
    }
}

/// Pending work of the tree traversal.
enum Step<'a, M> {
    Line(String),
    Visit { module: &'a M, prefix: String },
}

fn write_lines(f: &mut fmt::Formatter<'_>, header: &str, lines: &[String]) -> fmt::Result {
    writeln!(f, "{header}")?;
    for line in lines {
        writeln!(f, "{line}")?;
    }
    Ok(())
}

fn log_lines(level: Level, header: &str, lines: &[String]) {
    // Event levels must be known at compile time.
    let emit = |line: &str| match level {
        Level::ERROR => tracing::error!("{line}"),
        Level::WARN => tracing::warn!("{line}"),
        Level::INFO => tracing::info!("{line}"),
        Level::DEBUG => tracing::debug!("{line}"),
        _ => tracing::trace!("{line}"),
    };
    emit(header);
    for line in lines {
        emit(line);
    }
}
