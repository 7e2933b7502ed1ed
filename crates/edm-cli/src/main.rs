use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use edm_cli::commands::replay;
use edm_cli::{Cli, Commands, Config};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr so replay output can be piped.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    match &cli.command {
        Some(Commands::Replay(args)) => {
            let config =
                Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
            tracing::debug!(?config, "loaded configuration");

            let mut stdout = std::io::stdout().lock();
            let report = replay::run(&mut stdout, args, &config)?;
            replay::write_summary(&mut std::io::stderr().lock(), &report)?;
            if !report.is_clean() {
                anyhow::bail!("replay finished with {} failures", report.failures());
            }
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
