//! `modgraph` command line entry point.

// Console output belongs here
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;
mod manifest;
mod tracing;

use crate::tracing::TracingConfig;

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:?}");
        std::process::exit(1);
    }
}

fn run() -> miette::Result<()> {
    let cli = cli::parse();

    crate::tracing::init_tracing(&TracingConfig {
        format: cli.log_format,
        level: cli.log_level.into(),
        filter: cli.log_filter.clone(),
    })?;

    let output = cli.run()?;
    print!("{output}");
    Ok(())
}
