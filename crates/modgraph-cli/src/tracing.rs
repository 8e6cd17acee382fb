//! Tracing setup for the modgraph CLI
//!
//! Logs always go to stderr so command output on stdout stays parseable.
//! Filter precedence: `--log-filter`, then `RUST_LOG`, then `--log-level`
//! applied to the modgraph crates.

use std::io;
use tracing::Level;
use tracing_subscriber::{
    Layer, Registry, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Log line layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TracingFormat {
    /// Multi-line, human-readable
    Pretty,
    /// One line per event
    Compact,
    /// One JSON object per event
    Json,
    /// Thread ids and source locations included
    Dev,
}

/// Verbosity accepted by `--log-level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    /// Default
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Subscriber settings collected from the command line
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub format: TracingFormat,
    pub level: Level,
    /// Explicit filter directives, overriding `RUST_LOG` and `level`
    pub filter: Option<String>,
}

/// Directives enabling `level` for the modgraph crates only
fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    format!("modgraph={level},modgraph_cli={level}")
}

fn env_filter(config: &TracingConfig) -> miette::Result<EnvFilter> {
    match &config.filter {
        Some(directives) => EnvFilter::try_new(directives),
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_directives(config.level))),
    }
    .map_err(|e| miette::miette!("Invalid tracing filter: {e}"))
}

fn fmt_layer(format: TracingFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);
    match format {
        TracingFormat::Pretty => layer.pretty().with_thread_names(true).boxed(),
        TracingFormat::Compact => layer.compact().with_target(false).boxed(),
        TracingFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        TracingFormat::Dev => layer
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed(),
    }
}

/// Install the global subscriber
pub fn init_tracing(config: &TracingConfig) -> miette::Result<()> {
    let filter = env_filter(config)?;

    tracing_subscriber::registry()
        .with(fmt_layer(config.format))
        .with(filter)
        .init();

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        format = ?config.format,
        "Tracing initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(filter: Option<&str>) -> TracingConfig {
        TracingConfig {
            format: TracingFormat::Compact,
            level: Level::WARN,
            filter: filter.map(str::to_string),
        }
    }

    #[test]
    fn test_level_conversion() {
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
    }

    #[test]
    fn test_default_directives() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "modgraph=debug,modgraph_cli=debug"
        );
    }

    #[test]
    fn test_explicit_filter_is_used() {
        let filter = env_filter(&config(Some("modgraph=trace"))).unwrap();
        assert_eq!(filter.to_string(), "modgraph=trace");
    }
}
