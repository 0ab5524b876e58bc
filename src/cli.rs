//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Default number of items per batch run.
pub const DEFAULT_BATCH_LIMIT: u8 = 5;

/// Find, rank and store a representative image for text content.
///
/// Illustrator generates a search query for each item, searches for
/// candidate images, keeps the reachable ones, lets a language model pick
/// the best match and stores it, linking it back to the item.
#[derive(Parser, Debug)]
#[command(name = "illustrator")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to ~/.config/illustrator/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Illustrate a single item
    Process {
        /// Item identifier
        #[arg(long)]
        id: String,

        /// Content table the item lives in; without it the default table's
        /// text is used and nothing is written back
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Illustrate items of a table that have no image yet
    Batch {
        /// Content table
        #[arg(short, long)]
        table: String,

        /// Maximum number of items to process (1-100)
        #[arg(short = 'n', long, default_value_t = DEFAULT_BATCH_LIMIT, value_parser = clap::value_parser!(u8).range(1..=100))]
        limit: u8,
    },

    /// List configured content tables
    Tables,
}
