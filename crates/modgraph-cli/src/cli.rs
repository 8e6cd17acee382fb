use crate::manifest::Manifest;
use crate::tracing::{LogLevel, TracingFormat};
use clap::{Parser, Subcommand, ValueEnum};
use modgraph::{
    BoxError, CycleDetector, DependencyGraph, DependencyTreePrinter, Error, ModuleRankingsPrinter,
    WalkerKind,
};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, instrument};

#[derive(Parser, Debug)]
#[command(name = "modgraph")]
#[command(about = "Inspect and walk module dependency graphs")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[arg(help = "Path to the TOML module manifest")]
    pub manifest: PathBuf,

    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub log_level: LogLevel,

    #[arg(
        long,
        global = true,
        help = "Log output format",
        default_value = "compact",
        value_enum
    )]
    pub log_format: TracingFormat,

    #[arg(
        long,
        global = true,
        help = "Tracing filter directives (overrides RUST_LOG and --log-level)"
    )]
    pub log_filter: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    #[command(about = "Print modules in topological order")]
    Order,
    #[command(about = "Print modules with their ranks")]
    Rankings,
    #[command(about = "Draw the dependency tree")]
    Tree {
        #[arg(long, help = "Repeat subtrees that were already drawn")]
        no_filter: bool,
    },
    #[command(about = "List the dependencies of a module")]
    Deps {
        #[arg(help = "Module name")]
        module: String,
        #[arg(long, help = "Include transitive dependencies")]
        all: bool,
    },
    #[command(about = "Report dependency cycles")]
    Cycles,
    #[command(about = "Walk the graph on a thread pool")]
    Walk {
        #[arg(long, help = "Thread pool size (default: number of CPUs)")]
        threads: Option<usize>,
        #[arg(long, help = "Maximum modules in flight (overrides the manifest)")]
        parallelism: Option<usize>,
        #[arg(long, value_enum, help = "Scheduler backend (overrides the manifest)")]
        walker: Option<WalkerArg>,
        #[arg(long, default_value_t = 0, help = "Milliseconds each module takes")]
        delay_ms: u64,
        #[arg(long, help = "Module whose processing fails")]
        fail: Option<String>,
    },
}

/// Scheduler backend names accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WalkerArg {
    ReadyQueue,
    Rescan,
}

impl From<WalkerArg> for WalkerKind {
    fn from(arg: WalkerArg) -> Self {
        match arg {
            WalkerArg::ReadyQueue => Self::ReadyQueue,
            WalkerArg::Rescan => Self::Rescan,
        }
    }
}

impl Cli {
    /// Load the manifest and run the selected command
    pub fn run(&self) -> miette::Result<String> {
        let manifest = Manifest::load(&self.manifest)?;
        self.command.execute(&manifest)
    }
}

impl Commands {
    /// Run against `manifest`, returning what should be printed on stdout
    #[instrument(skip(manifest))]
    pub fn execute(&self, manifest: &Manifest) -> miette::Result<String> {
        match self {
            Self::Cycles => cycles(manifest),
            Self::Order => Ok(lines(load_graph(manifest)?.topological_order())),
            Self::Rankings => Ok(ModuleRankingsPrinter::new(&load_graph(manifest)?).to_string()),
            Self::Tree { no_filter } => Ok(DependencyTreePrinter::new(&load_graph(manifest)?)
                .with_filter_transitive(!no_filter)
                .to_string()),
            Self::Deps { module, all } => deps(&load_graph(manifest)?, module, *all),
            Self::Walk {
                threads,
                parallelism,
                walker,
                delay_ms,
                fail,
            } => {
                let mut config = manifest.walk.clone();
                if let Some(parallelism) = parallelism {
                    config = config.with_parallelism(*parallelism);
                }
                if let Some(walker) = walker {
                    config = config.with_walker((*walker).into());
                }
                let options = WalkOptions {
                    threads: *threads,
                    delay: Duration::from_millis(*delay_ms),
                    fail: fail.as_deref(),
                };
                walk(&load_graph(manifest)?, &config, &options)
            }
        }
    }
}

fn load_graph(manifest: &Manifest) -> miette::Result<DependencyGraph<String>> {
    let graph = DependencyGraph::from_builder(manifest.builder()?)?;
    debug!(?graph, "Graph ready");
    Ok(graph)
}

fn lines<T: std::fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    items.into_iter().fold(String::new(), |mut out, item| {
        let _ = writeln!(out, "{item}");
        out
    })
}

fn deps(graph: &DependencyGraph<String>, module: &str, all: bool) -> miette::Result<String> {
    let module = module.to_string();
    if all {
        return Ok(lines(graph.all_dependencies(&module)?));
    }
    if !graph.graph().contains(&module) {
        return Err(Error::unknown_node(&module).into());
    }
    Ok(lines(graph.direct_dependencies(&module)))
}

fn cycles(manifest: &Manifest) -> miette::Result<String> {
    let model = manifest.builder()?.build()?;
    let cycles = CycleDetector::new(&model).nontrivial_cycles();
    if cycles.is_empty() {
        return Ok("No cycles\n".to_string());
    }
    Ok(lines(
        cycles
            .iter()
            .map(|cycle| format!("[{}]", cycle.join(", "))),
    ))
}

struct WalkOptions<'a> {
    threads: Option<usize>,
    delay: Duration,
    fail: Option<&'a str>,
}

fn walk(
    graph: &DependencyGraph<String>,
    config: &modgraph::WalkConfig,
    options: &WalkOptions<'_>,
) -> miette::Result<String> {
    if let Some(fail) = options.fail {
        if !graph.graph().contains(&fail.to_string()) {
            return Err(Error::unknown_node(fail).into());
        }
    }

    let mut pool = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("modgraph-worker-{i}"));
    if let Some(threads) = options.threads {
        pool = pool.num_threads(threads);
    }
    let pool = pool
        .build()
        .map_err(|e| miette::miette!("Failed to build thread pool: {e}"))?;

    let finished = Mutex::new(Vec::with_capacity(graph.len()));
    graph.walk_graph_with(&pool, config, |module: &String| {
        if !options.delay.is_zero() {
            thread::sleep(options.delay);
        }
        if options.fail == Some(module.as_str()) {
            return Err(BoxError::from(format!("injected failure in '{module}'")));
        }
        finished
            .lock()
            .map_err(|_| BoxError::from("finished list poisoned"))?
            .push(module.clone());
        Ok(())
    })?;

    let finished = finished
        .into_inner()
        .map_err(|_| miette::miette!("finished list poisoned"))?;
    info!(modules = finished.len(), walker = %config.walker, "Walk finished");

    let mut out = lines(&finished);
    let _ = writeln!(out, "Walked {} modules", finished.len());
    Ok(out)
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const MANIFEST: &str = r#"
[[module]]
name = "a"

[[module]]
name = "b"
requires = ["a"]

[[module]]
name = "c"
requires = ["a", "b"]

[[module]]
name = "h"
requires = ["c"]

[[module]]
name = "i"
requires = ["c"]

[[module]]
name = "k"
"#;

    fn manifest() -> Manifest {
        Manifest::parse(MANIFEST).unwrap()
    }

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["modgraph", "graph.toml", "order"]).unwrap();
        assert_eq!(cli.manifest, PathBuf::from("graph.toml"));
        assert_eq!(cli.log_level, LogLevel::Warn);
        assert_eq!(cli.log_format, TracingFormat::Compact);
        assert_eq!(cli.log_filter, None);
        assert_eq!(cli.command, Commands::Order);
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from([
            "modgraph",
            "graph.toml",
            "tree",
            "--no-filter",
            "-l",
            "debug",
            "--log-format",
            "json",
            "--log-filter",
            "modgraph=trace",
        ])
        .unwrap();
        assert_eq!(cli.log_filter.as_deref(), Some("modgraph=trace"));
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert_eq!(cli.log_format, TracingFormat::Json);
        assert_eq!(cli.command, Commands::Tree { no_filter: true });
    }

    #[test]
    fn test_walk_arguments() {
        let cli = Cli::try_parse_from([
            "modgraph",
            "graph.toml",
            "walk",
            "--threads",
            "4",
            "--parallelism",
            "2",
            "--walker",
            "rescan",
            "--delay-ms",
            "5",
            "--fail",
            "b",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Commands::Walk {
                threads: Some(4),
                parallelism: Some(2),
                walker: Some(WalkerArg::Rescan),
                delay_ms: 5,
                fail: Some("b".to_string()),
            }
        );
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(Cli::try_parse_from(["modgraph", "graph.toml"]).is_err());
        assert!(Cli::try_parse_from(["modgraph", "order"]).is_err());
        assert!(Cli::try_parse_from(["modgraph", "g.toml", "order", "-l", "loud"]).is_err());
        assert!(Cli::try_parse_from(["modgraph", "g.toml", "walk", "--walker", "fast"]).is_err());
    }

    #[test]
    fn test_order_command() {
        let out = Commands::Order.execute(&manifest()).unwrap();
        assert_eq!(out, "a\nb\nc\nh\ni\nk\n");
    }

    #[test]
    fn test_rankings_command() {
        let out = Commands::Rankings.execute(&manifest()).unwrap();
        assert!(out.starts_with("Module Rankings\n* a (3)\n  b (2)\n"));
    }

    #[test]
    fn test_tree_command() {
        let filtered = Commands::Tree { no_filter: false }
            .execute(&manifest())
            .unwrap();
        assert!(filtered.contains("... (skipped 2 other dependencies)"));

        let full = Commands::Tree { no_filter: true }
            .execute(&manifest())
            .unwrap();
        assert!(!full.contains("skipped"));
    }

    #[test]
    fn test_deps_command() {
        let direct = Commands::Deps {
            module: "c".to_string(),
            all: false,
        };
        assert_eq!(direct.execute(&manifest()).unwrap(), "a\nb\n");

        let all = Commands::Deps {
            module: "h".to_string(),
            all: true,
        };
        assert_eq!(all.execute(&manifest()).unwrap(), "a\nb\nc\n");

        let unknown = Commands::Deps {
            module: "zz".to_string(),
            all: false,
        };
        assert!(unknown.execute(&manifest()).is_err());
    }

    #[test]
    fn test_cycles_command() {
        assert_eq!(Commands::Cycles.execute(&manifest()).unwrap(), "No cycles\n");

        let cyclic = Manifest::parse(
            "[[module]]\nname = \"x\"\nrequires = [\"y\"]\n\n[[module]]\nname = \"y\"\nrequires = [\"x\"]\n",
        )
        .unwrap();
        assert_eq!(Commands::Cycles.execute(&cyclic).unwrap(), "[x, y]\n");
        assert!(Commands::Order.execute(&cyclic).is_err());
    }

    #[test]
    fn test_walk_command() {
        let walk = Commands::Walk {
            threads: Some(2),
            parallelism: None,
            walker: None,
            delay_ms: 0,
            fail: None,
        };
        let out = walk.execute(&manifest()).unwrap();
        assert!(out.ends_with("Walked 6 modules\n"));
        assert_eq!(out.lines().count(), 7);
    }

    #[test]
    fn test_walk_command_reports_failure() {
        let walk = Commands::Walk {
            threads: Some(2),
            parallelism: Some(1),
            walker: Some(WalkerArg::Rescan),
            delay_ms: 0,
            fail: Some("b".to_string()),
        };
        let err = walk.execute(&manifest()).unwrap_err();
        assert!(err.to_string().contains("Module 'b' failed"));
    }

    #[test]
    fn test_walk_rejects_unknown_failing_module() {
        let walk = Commands::Walk {
            threads: Some(1),
            parallelism: None,
            walker: None,
            delay_ms: 0,
            fail: Some("nope".to_string()),
        };
        let err = walk.execute(&manifest()).unwrap_err();
        assert!(err.to_string().contains("Node 'nope' is not part of the graph"));
    }
}
