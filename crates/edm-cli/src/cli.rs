//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::replay::ReplayArgs;

/// Overflow event timeline engine.
///
/// Interprets status polls from overflow monitors into events and labels each
/// asset's days by how long it spent overflowing.
#[derive(Debug, Parser)]
#[command(name = "edm", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Replay recorded polls and print daily labels.
    Replay(ReplayArgs),
}
