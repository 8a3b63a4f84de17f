mod cli;
mod config;
mod error;
mod playback;

use crate::{cli::Args, config::AppConfig, error::Result};
use clap::Parser;
use std::process;
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet);

    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    if args.show_config {
        println!("{}", config.show()?);
        return Ok(());
    }

    info!(
        fps = config.playback.fps,
        duration = config.playback.duration_secs,
        throttle_ms = config.driver.throttle_interval_ms,
        "Starting simulated playback"
    );
    let report = playback::run(&config).await?;

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to render report: {}", e),
    }
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
