use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use medsync::cli::args::{Cli, Commands};
use medsync::cli::commands;
use medsync::config::{Config, Paths};
use medsync::SyncService;

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn setup_logging(default_level: &str) {
    let filter = EnvFilter::try_from_env("MEDSYNC_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        commands::completions(shell)?;
        return Ok(());
    }

    let paths = match cli.data_dir {
        Some(root) => Paths::with_root(root),
        None => Paths::new()?,
    };
    let config = Config::load_from_path(&paths.config_file)?;
    setup_logging(&config.general.log_level);

    let format = cli.output.unwrap_or(config.general.default_output);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let output = runtime.block_on(async {
        let service = SyncService::open(&config, &paths)
            .with_context(|| format!("failed to open data directory {}", paths.root.display()))?;

        let output = match cli.command {
            Commands::Record(args) => commands::record(&service, args.command, format)?,
            Commands::Sync(args) => commands::sync(&service, args.command, format).await?,
            Commands::Completions { .. } => String::new(),
        };
        anyhow::Ok(output)
    })?;

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
