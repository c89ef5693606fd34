//! Command-line interface definition.

use bundle_updater::UpdaterConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use url::Url;

/// Check for, verify and hand off signed application bundle updates.
#[derive(Parser, Debug)]
#[command(name = "bundle-updater")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, short, env = "BUNDLE_UPDATER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Update feed URL.
    #[arg(long, env = "BUNDLE_UPDATER_FEED_URL")]
    pub feed_url: Option<Url>,

    /// Bundle of the running application.
    #[arg(long, env = "BUNDLE_UPDATER_BUNDLE")]
    pub bundle: Option<PathBuf>,

    /// Installer executable.
    #[arg(long, env = "BUNDLE_UPDATER_INSTALLER")]
    pub installer: Option<PathBuf>,

    /// Version of the running application.
    #[arg(long, env = "BUNDLE_UPDATER_CURRENT_VERSION")]
    pub current_version: Option<String>,

    /// Extra feed request header, as `Name: value`. Repeatable.
    #[arg(long = "header", short = 'H', value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Directory for downloaded packages.
    #[arg(long, env = "BUNDLE_UPDATER_DOWNLOAD_DIR")]
    pub download_dir: Option<PathBuf>,

    /// Do not relaunch the application after installing.
    #[arg(long)]
    pub no_relaunch: bool,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum Command {
    /// Run a single check and exit.
    Check,
    /// Check periodically until an update is dispatched or Ctrl-C.
    Watch {
        /// Seconds between checks (overrides the configuration).
        #[arg(long)]
        interval: Option<u64>,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name is empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

impl Cli {
    /// Convert CLI arguments into an `UpdaterConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded,
    /// or if required settings are missing from both file and arguments.
    pub fn into_config(self) -> color_eyre::Result<UpdaterConfig> {
        // Start with the config file, or build one from required arguments
        let mut config = if let Some(ref path) = self.config {
            UpdaterConfig::from_file(path)?
        } else {
            let feed_url = self
                .feed_url
                .clone()
                .ok_or_else(|| color_eyre::eyre::eyre!("--feed-url or --config is required"))?;
            let bundle = self
                .bundle
                .clone()
                .ok_or_else(|| color_eyre::eyre::eyre!("--bundle or --config is required"))?;
            let installer = self
                .installer
                .clone()
                .ok_or_else(|| color_eyre::eyre::eyre!("--installer or --config is required"))?;
            UpdaterConfig::new(feed_url, bundle, installer)
        };

        // Override with CLI arguments
        if let Some(feed_url) = self.feed_url {
            config.feed_url = feed_url;
        }
        if let Some(bundle) = self.bundle {
            config.running_bundle = bundle;
        }
        if let Some(installer) = self.installer {
            config.installer.path = installer;
        }
        if let Some(version) = self.current_version {
            config.current_version = version;
        }
        if let Some(dir) = self.download_dir {
            config.download_dir = dir;
        }
        if self.no_relaunch {
            config.installer.relaunch = false;
        }
        if let Command::Watch {
            interval: Some(secs),
        } = self.command
        {
            config.check_interval_secs = secs;
        }
        config.headers.extend(self.headers);
        config.log_level = self.log_level;

        Ok(config)
    }
}
