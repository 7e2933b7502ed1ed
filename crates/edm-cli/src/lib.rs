//! Replay harness for the overflow event engine.
//!
//! Loads recorded polls, runs them through the worker pool and prints the
//! resulting daily labels.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands};
pub use config::Config;
