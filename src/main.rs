//! Segue CLI
//!
//! Command-line interface for the Segue flow engine.

use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use segue::cli::{commands, Cli, Commands};
use segue::config::SegueConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!("Segue v{}", env!("CARGO_PKG_VERSION"));
    let config = SegueConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Score { library, from, to } => commands::score(&config, &library, &from, &to),
        Commands::Recommend { library, track, limit } => commands::recommend(&config, &library, &track, limit),
        Commands::BuildFlow {
            library,
            seed,
            length,
            layers,
            output,
        } => commands::build(&config, &library, &seed, length, layers, output.as_deref()),
        Commands::FindBridge {
            library,
            flow,
            left,
            right,
            generate,
            output,
        } => commands::find_bridge(&config, &library, &flow, left, right, generate, output.as_deref()),
        Commands::Render {
            library,
            seed,
            flow,
            length,
            layers,
            output,
            bit_depth,
        } => commands::render(
            &config,
            &library,
            seed.as_deref(),
            flow.as_deref(),
            length,
            layers,
            &output,
            bit_depth,
        ),
    }
}
