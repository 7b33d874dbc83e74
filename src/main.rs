use clap::Parser;

use fsmonitor::Settings;
use fsmonitor::cli::commands::{init, inspect, watch};
use fsmonitor::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let settings = loaded.unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        eprintln!("Using default configuration for now.");
        Settings::default()
    });

    fsmonitor::logging::init_with_config(&settings.logging);

    let result = match cli.command {
        Commands::Init { force } => init::run_init(force),
        Commands::Config => init::run_config(&settings),
        Commands::Watch(args) => watch::run(args, settings).await,
        Commands::Ls { path, filter } => inspect::run_ls(&path, &filter, settings),
        Commands::Stat { path, json } => inspect::run_stat(&path, json, settings),
        Commands::Hash { path } => inspect::run_hash(&path, settings).await,
        Commands::Read { path, offset, size } => {
            inspect::run_read(&path, offset, size, settings).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
