//! bundle-updater CLI entry point.

mod cli;

use bundle_updater::{CheckOutcome, Updater, UpdaterConfig, UpdaterEvent};
use clap::Parser;
use cli::{Cli, Command};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();
    let command = cli.command;

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("bundle-updater v{}", env!("CARGO_PKG_VERSION"));

    // Build configuration
    let config = cli.into_config()?;
    let updater = build_updater(&config)?;

    match command {
        Command::Check => run_check(&updater).await?,
        Command::Watch { .. } => run_watch(&updater, &config).await?,
    }

    info!("Goodbye!");
    Ok(())
}

fn build_updater(config: &UpdaterConfig) -> color_eyre::Result<Updater> {
    let updater = Updater::builder(config.update_request())
        .current_version(config.current_version()?)
        .running_bundle(&config.running_bundle)
        .download_dir(&config.download_dir)
        .installer(Arc::new(config.process_installer()))
        .relaunch(
            config.installer.relaunch,
            config.installer.relaunch_args.clone(),
        )
        .build()?;
    Ok(updater)
}

async fn run_check(updater: &Updater) -> color_eyre::Result<()> {
    match updater.check_for_updates().await? {
        CheckOutcome::Installed(update) => {
            info!(
                "Update {} handed to the installer; exiting so it can proceed",
                update.version
            );
        }
        CheckOutcome::UpToDate => info!("Already up to date ({})", updater.current_version()),
        CheckOutcome::AlreadyChecking => warn!("A check is already running"),
    }
    Ok(())
}

async fn run_watch(updater: &Updater, config: &UpdaterConfig) -> color_eyre::Result<()> {
    let Some(interval) = config.check_interval() else {
        return Err(color_eyre::eyre::eyre!(
            "automatic checks are disabled (check_interval_secs = 0)"
        ));
    };

    let mut events = updater.events();
    let schedule = updater.start_automatic_checks(interval)?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(UpdaterEvent::UpdateDispatched { version }) => {
                    info!("Update {version} handed to the installer; exiting so it can proceed");
                    break;
                }
                Ok(UpdaterEvent::CheckFailed { kind, message }) => {
                    error!("Scheduled check failed ({kind:?}): {message}");
                }
                Ok(event) => info!("Updater event: {event:?}"),
                Err(RecvError::Lagged(skipped)) => warn!("Missed {skipped} updater events"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, stopping automatic checks");
                break;
            }
        }
    }

    schedule.cancel();
    Ok(())
}
