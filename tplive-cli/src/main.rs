mod cli;
mod config;
mod logging;

use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tiktok_live::{
    CommandDispatcher, OutboundChannel, SessionController, SessionDeps, run_host_loop,
};
use tokio::io::BufReader;
use tracing::{info, warn};

use crate::{cli::Args, config::AppConfig};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config =
        AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply_args(&args);
    config.validate()?;

    let _guard = logging::init_logging(&config.logging, args.verbose)
        .context("Failed to initialize logging")?;
    info!(version = env!("CARGO_PKG_VERSION"), "tplive starting");

    let provider = config
        .live_provider()
        .context("Failed to create relay provider")?;
    if provider.is_none() {
        warn!("No relay configured, start actions will report the live connection as unavailable");
    }
    let followers = config
        .follower_lookup()
        .context("Failed to create follower lookup")?;

    let outbound = OutboundChannel::stdout();
    let controller = SessionController::spawn(
        SessionDeps {
            provider,
            followers,
            outbound: outbound.clone(),
        },
        config.session_config(),
    );
    let dispatcher = CommandDispatcher::new(controller, outbound);

    let stdin = BufReader::new(tokio::io::stdin());
    if let Err(e) = run_host_loop(stdin, &dispatcher).await {
        warn!(error = %e, "Session shutdown did not complete");
    }

    info!("tplive stopped");
    Ok(())
}
