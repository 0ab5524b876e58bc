//! CLI entry point for the illustrator tool.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use illustrator_core::{Credentials, load_config};
use tracing::{debug, error, info};

mod cli;
mod commands;

use cli::{Args, Command};

/// How the process ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// At least one item was illustrated, or nothing needed doing.
    Success,
    /// No item was illustrated.
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Failure => ExitCode::FAILURE,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    init_tracing(&args);
    debug!(?args, "CLI arguments parsed");

    match run(args).await {
        Ok(exit) => exit.into(),
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Priority: `RUST_LOG` > `--quiet` > `-v`/`-vv` > default (info).
fn init_tracing(args: &Args) {
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .try_init();
}

async fn run(args: Args) -> Result<ProcessExit> {
    let loaded = load_config(args.config.as_deref()).context("loading configuration")?;
    match &loaded.path {
        Some(path) => debug!(path = %path.display(), "configuration loaded"),
        None => debug!("no configuration file; using built-in defaults"),
    }

    if matches!(args.command, Command::Tables) {
        commands::run_tables_command(&loaded.config, args.json)?;
        return Ok(ProcessExit::Success);
    }

    let credentials = Credentials::from_env();
    let pipeline = commands::build_pipeline(loaded.config, &credentials).await?;
    info!("Illustrator starting");

    match args.command {
        Command::Process { id, table } => {
            commands::run_process_command(&pipeline, &id, table.as_deref(), args.json).await
        }
        Command::Batch { table, limit } => {
            let show_progress = io::stderr().is_terminal() && !args.quiet;
            commands::run_batch_command(&pipeline, &table, usize::from(limit), args.json, show_progress)
                .await
        }
        Command::Tables => Ok(ProcessExit::Success),
    }
}
