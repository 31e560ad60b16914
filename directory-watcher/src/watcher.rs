//! Directory watcher loop.

use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{WatchMode, WatcherConfig};
use crate::detector::Detector;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::event::CycleReport;
use crate::scanner::InputItem;

/// Quiet period after a change notification before scanning.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Periodically scans the source directory and dispatches pending inputs.
pub struct DirectoryWatcher {
    dispatcher: Dispatcher,

    interval: Duration,

    mode: WatchMode,
}

impl DirectoryWatcher {
    /// Create a new directory watcher.
    pub fn new(config: WatcherConfig, detector: Arc<dyn Detector>) -> Result<Self> {
        Ok(Self {
            interval: config.interval(),
            mode: config.watch_mode,
            dispatcher: Dispatcher::new(config, detector)?,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn list_pending(&self) -> Result<Vec<InputItem>> {
        self.dispatcher.list_pending()
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.dispatcher.run_cycle().await
    }

    /// Scan and dispatch until an error occurs.
    pub async fn run_forever(&self) -> Result<()> {
        self.run_until(CancellationToken::new()).await
    }

    /// Scan and dispatch until `shutdown` is cancelled or an error occurs.
    ///
    /// Both directories are created first. Once `shutdown` is cancelled no
    /// further detector run is started; one already running is awaited.
    pub async fn run_until(&self, shutdown: CancellationToken) -> Result<()> {
        self.dispatcher.ensure_directories().await?;

        let (wake_tx, mut wake_rx) = mpsc::channel(1);
        let _watcher = match self.mode {
            WatchMode::Realtime => Some(self.watch_source(wake_tx)?),
            WatchMode::Scheduled => None,
        };

        info!(
            "Watching {} every {:?} ({:?})",
            self.dispatcher.config().source_dir.display(),
            self.interval,
            self.mode
        );

        loop {
            info!("Running scan");
            let report = self.dispatcher.run_cycle_until(&shutdown).await?;
            if !report.records.is_empty() {
                info!(
                    "Scan complete: {} processed, {} failed",
                    report.completed(),
                    report.failed()
                );
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
                Some(()) = wake_rx.recv() => {
                    debug!("Source directory changed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(SETTLE_DELAY) => {}
                    }
                    while wake_rx.try_recv().is_ok() {}
                }
            }
        }

        info!("Directory watcher stopped");
        Ok(())
    }

    /// Start a filesystem watch that signals `wake_tx` on source changes.
    fn watch_source(&self, wake_tx: mpsc::Sender<()>) -> Result<RecommendedWatcher> {
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if event.kind.is_access() {
                        return;
                    }
                    // A wake is already pending when the channel is full.
                    let _ = wake_tx.try_send(());
                }
                Err(e) => {
                    error!("Watch error: {e}");
                }
            },
        )?;

        let source_dir = &self.dispatcher.config().source_dir;
        watcher.watch(source_dir, RecursiveMode::NonRecursive)?;
        debug!("Started watching: {}", source_dir.display());

        Ok(watcher)
    }
}
