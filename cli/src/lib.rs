//! Command-line wiring for the panoptic directory watcher.
//!
//! Settings come from an optional TOML file and are overridden by flags.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use panoptic_directory_watcher::{
    CancellationToken, CommandDetector, DetectorConfig, DirectoryWatcher, WatchMode, WatcherConfig,
};
use tracing::{info, warn};

/// Exit status for a forced stop, as a shell reports SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Watch a directory of videos and run a detector on each new one.
#[derive(Debug, Default, Parser)]
#[command(name = "panoptic-watch", version)]
pub struct Cli {
    /// TOML file with watcher settings.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Directory scanned for new videos.
    #[arg(long)]
    pub source_dir: Option<PathBuf>,

    /// Directory the detector writes processed videos into.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Video file extension, without the dot.
    #[arg(long)]
    pub extension: Option<String>,

    /// Seconds between scans.
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Seconds a single detector run may take (0 disables the limit).
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Also scan as soon as the source directory changes.
    #[arg(long)]
    pub realtime: bool,

    /// Exit on the first failed or timed out detector run.
    #[arg(long)]
    pub halt_on_failure: bool,

    /// Run a single scan and exit.
    #[arg(long)]
    pub once: bool,

    /// Detector program and arguments; `{id}` is replaced by the video name.
    #[arg(last = true)]
    pub detector: Vec<String>,
}

impl Cli {
    /// Build the effective watcher config.
    pub fn load_config(&self) -> Result<WatcherConfig> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => WatcherConfig::default(),
        };

        if let Some(dir) = &self.source_dir {
            config.source_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(extension) = &self.extension {
            config = config.with_extension(extension.clone());
        }
        if let Some(secs) = self.interval_secs {
            config = config.with_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout_secs = (secs > 0).then_some(secs);
        }
        if self.realtime {
            config = config.with_mode(WatchMode::Realtime);
        }
        if self.halt_on_failure {
            config = config.halt_on_failure();
        }
        if let Some((program, args)) = self.detector.split_first() {
            config = config.with_detector(DetectorConfig {
                program: program.clone(),
                args: args.to_vec(),
            });
        }

        config.validate()?;
        Ok(config)
    }
}

/// Read a watcher config from a TOML file.
pub fn read_config(path: &Path) -> Result<WatcherConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("invalid config {}", path.display()))
}

/// Run the watcher until Ctrl-C or a fatal error.
pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;
    let detector = CommandDetector::new(config.detector.clone())?;

    info!("Source directory: {}", config.source_dir.display());
    info!("Output directory: {}", config.output_dir.display());

    let watcher = DirectoryWatcher::new(config, Arc::new(detector))?;

    if cli.once {
        watcher.dispatcher().ensure_directories().await?;
        let report = watcher.run_cycle().await?;
        info!(
            "Processed {} of {} pending videos",
            report.completed(),
            report.pending.len()
        );
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            return;
        }
        info!("Received Ctrl-C, stopping after the current detector run");
        signal_token.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received second Ctrl-C, exiting immediately");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });

    watcher
        .run_until(shutdown)
        .await
        .context("directory watcher stopped")
}
