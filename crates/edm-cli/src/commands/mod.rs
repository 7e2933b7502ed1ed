//! CLI subcommand implementations.

pub mod replay;
