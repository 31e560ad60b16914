//! Scan-and-dispatch of pending inputs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::detector::Detector;
use crate::error::{Result, WatcherError};
use crate::event::{CycleReport, DispatchOutcome, DispatchRecord};
use crate::guard::{DispatchGuard, GuardState};
use crate::scanner::{InputItem, Scanner};

/// Hands pending inputs to a detector, one at a time.
pub struct Dispatcher {
    scanner: Scanner,

    detector: Arc<dyn Detector>,

    /// Held for the duration of each detector call.
    guard: DispatchGuard,

    timeout: Option<Duration>,

    halt_on_failure: bool,
}

impl Dispatcher {
    /// Create a new dispatcher for the configured directory pair.
    ///
    /// The detector command in `config` is not used; `detector` is.
    pub fn new(config: WatcherConfig, detector: Arc<dyn Detector>) -> Result<Self> {
        config.validate_layout()?;

        Ok(Self {
            timeout: config.timeout(),
            halt_on_failure: config.halt_on_failure,
            scanner: Scanner::new(config),
            detector,
            guard: DispatchGuard::new(),
        })
    }

    pub fn config(&self) -> &WatcherConfig {
        self.scanner.config()
    }

    pub fn guard_state(&self) -> GuardState {
        self.guard.state()
    }

    /// Create the source and output directories if they are missing.
    pub async fn ensure_directories(&self) -> Result<()> {
        let config = self.config();
        for dir in [&config.source_dir, &config.output_dir] {
            fs::create_dir_all(dir).await?;
            debug!("Ensured directory: {}", dir.display());
        }
        Ok(())
    }

    /// Items in the source directory with no output marker.
    pub fn list_pending(&self) -> Result<Vec<InputItem>> {
        self.scanner.list_pending()
    }

    /// Run the detector for one item unless another dispatch is in flight.
    ///
    /// A request arriving while busy is dropped, not queued. The guard is
    /// released however the detector call ends.
    pub async fn dispatch(&self, item: &InputItem) -> DispatchOutcome {
        let Some(_token) = self.guard.try_acquire() else {
            debug!("Dropping dispatch of {item}: detector busy");
            return DispatchOutcome::Dropped;
        };

        info!("Dispatching {item} to {}", self.detector.name());
        let call = self.detector.process(item.identifier());

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Detector timed out on {item} after {limit:?}");
                    return DispatchOutcome::TimedOut;
                }
            },
            None => call.await,
        };

        match result {
            Ok(()) => DispatchOutcome::Completed,
            Err(e) => {
                warn!("Detector failed on {item}: {e}");
                DispatchOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// List pending items and dispatch each in turn.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.run_cycle_until(&CancellationToken::new()).await
    }

    /// Like [`run_cycle`](Self::run_cycle), but starts no further dispatch
    /// once `shutdown` is cancelled. A detector run already in progress is
    /// awaited.
    pub async fn run_cycle_until(&self, shutdown: &CancellationToken) -> Result<CycleReport> {
        let pending = self.list_pending()?;
        let mut records = Vec::with_capacity(pending.len());

        if !pending.is_empty() {
            info!("Scan found {} pending items", pending.len());
        }

        for item in &pending {
            if shutdown.is_cancelled() {
                info!(
                    "Shutdown requested, leaving {} items for later",
                    pending.len() - records.len()
                );
                break;
            }

            let started_at = Utc::now();
            let start = Instant::now();
            let outcome = self.dispatch(item).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            if outcome == DispatchOutcome::Completed {
                info!("Processed {item} in {duration_ms}ms");
            }

            if self.halt_on_failure {
                if let Some(reason) = outcome.reason() {
                    return Err(WatcherError::DispatchFailed {
                        identifier: item.to_string(),
                        reason,
                    });
                }
            }

            records.push(DispatchRecord {
                identifier: item.to_string(),
                outcome,
                started_at,
                duration_ms,
            });
        }

        Ok(CycleReport { pending, records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    /// Records calls and optionally writes the output marker.
    struct FakeDetector {
        output_dir: std::path::PathBuf,
        write_output: bool,
        fail_on: Option<String>,
        delay: Duration,
        cancel_on_call: Option<CancellationToken>,
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeDetector {
        fn new(output_dir: &std::path::Path) -> Self {
            Self {
                output_dir: output_dir.to_path_buf(),
                write_output: false,
                fail_on: None,
                delay: Duration::ZERO,
                cancel_on_call: None,
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Detector for FakeDetector {
        fn name(&self) -> &str {
            "fake"
        }

        async fn process(&self, identifier: &str) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(identifier.to_string());
            if let Some(token) = &self.cancel_on_call {
                token.cancel();
            }

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on.as_deref() == Some(identifier) {
                return Err(WatcherError::Detector(format!("cannot segment {identifier}")));
            }
            if self.write_output {
                fs::write(self.output_dir.join(format!("{identifier}.mp4")), b"")?;
            }
            Ok(())
        }
    }

    fn setup(sources: &[&str], outputs: &[&str]) -> (TempDir, WatcherConfig) {
        let root = TempDir::new().unwrap();
        let config = WatcherConfig::new(root.path().join("original"), root.path().join("panoptic"));
        fs::create_dir_all(&config.source_dir).unwrap();
        fs::create_dir_all(&config.output_dir).unwrap();
        for name in sources {
            fs::write(config.source_dir.join(name), b"").unwrap();
        }
        for name in outputs {
            fs::write(config.output_dir.join(name), b"").unwrap();
        }
        (root, config)
    }

    #[tokio::test]
    async fn test_cycle_dispatches_only_unprocessed() {
        let (_root, config) = setup(&["a.mp4", "b.mp4"], &["a.mp4"]);
        let detector = Arc::new(FakeDetector::new(&config.output_dir));
        let dispatcher = Dispatcher::new(config, detector.clone()).unwrap();

        let report = dispatcher.run_cycle().await.unwrap();

        assert_eq!(detector.calls(), vec!["b"]);
        assert_eq!(report.dispatched(), vec!["b"]);
        assert_eq!(report.completed(), 1);
    }

    #[tokio::test]
    async fn test_every_pending_item_processed_in_one_cycle() {
        let (_root, config) = setup(&["a.mp4", "b.mp4", "c.mp4"], &[]);
        let detector = Arc::new(FakeDetector::new(&config.output_dir));
        let dispatcher = Dispatcher::new(config, detector.clone()).unwrap();

        let report = dispatcher.run_cycle().await.unwrap();

        let mut calls = detector.calls();
        calls.sort();
        assert_eq!(calls, vec!["a", "b", "c"]);
        assert_eq!(report.completed(), 3);
        assert_eq!(detector.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeated_cycles_reprocess_without_output() {
        let (_root, config) = setup(&["a.mp4"], &[]);
        let detector = Arc::new(FakeDetector::new(&config.output_dir));
        let dispatcher = Dispatcher::new(config, detector.clone()).unwrap();

        dispatcher.run_cycle().await.unwrap();
        dispatcher.run_cycle().await.unwrap();

        assert_eq!(detector.calls(), vec!["a", "a"]);
    }

    #[tokio::test]
    async fn test_output_marker_stops_reprocessing() {
        let (_root, config) = setup(&["a.mp4"], &[]);
        let mut fake = FakeDetector::new(&config.output_dir);
        fake.write_output = true;
        let detector = Arc::new(fake);
        let dispatcher = Dispatcher::new(config, detector.clone()).unwrap();

        dispatcher.run_cycle().await.unwrap();
        let second = dispatcher.run_cycle().await.unwrap();

        assert_eq!(detector.calls(), vec!["a"]);
        assert!(second.pending.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_is_dropped() {
        let (_root, config) = setup(&[], &[]);
        let mut fake = FakeDetector::new(&config.output_dir);
        fake.delay = Duration::from_millis(200);
        let detector = Arc::new(fake);
        let dispatcher = Dispatcher::new(config, detector.clone()).unwrap();

        let a = InputItem::from("a");
        let b = InputItem::from("b");
        let (first, second) = tokio::join!(dispatcher.dispatch(&a), dispatcher.dispatch(&b));

        assert_eq!(first, DispatchOutcome::Completed);
        assert_eq!(second, DispatchOutcome::Dropped);
        assert_eq!(detector.calls(), vec!["a"]);
        assert_eq!(detector.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.guard_state(), GuardState::Idle);
    }

    #[tokio::test]
    async fn test_guard_released_after_failure() {
        let (_root, config) = setup(&["a.mp4", "b.mp4"], &[]);
        let mut fake = FakeDetector::new(&config.output_dir);
        fake.fail_on = Some("a".to_string());
        let detector = Arc::new(fake);
        let dispatcher = Dispatcher::new(config, detector.clone()).unwrap();

        let report = dispatcher.run_cycle().await.unwrap();

        assert_eq!(dispatcher.guard_state(), GuardState::Idle);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.completed(), 1);
        assert_eq!(detector.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_releases_guard() {
        let (_root, config) = setup(&[], &[]);
        let config = config.with_timeout(Some(Duration::from_secs(1)));
        let mut fake = FakeDetector::new(&config.output_dir);
        fake.delay = Duration::from_secs(30);
        let dispatcher = Dispatcher::new(config, Arc::new(fake)).unwrap();

        let outcome = dispatcher.dispatch(&InputItem::from("slow")).await;

        assert_eq!(outcome, DispatchOutcome::TimedOut);
        assert_eq!(dispatcher.guard_state(), GuardState::Idle);
    }

    #[tokio::test]
    async fn test_halt_on_failure_stops_cycle() {
        let (_root, config) = setup(&["a.mp4"], &[]);
        let config = config.halt_on_failure();
        let mut fake = FakeDetector::new(&config.output_dir);
        fake.fail_on = Some("a".to_string());
        let dispatcher = Dispatcher::new(config, Arc::new(fake)).unwrap();

        let err = dispatcher.run_cycle().await.unwrap_err();

        assert!(matches!(
            err,
            WatcherError::DispatchFailed { ref identifier, .. } if identifier == "a"
        ));
        assert_eq!(dispatcher.guard_state(), GuardState::Idle);
    }

    #[tokio::test]
    async fn test_ensure_directories_is_idempotent() {
        let root = TempDir::new().unwrap();
        let config = WatcherConfig::new(
            root.path().join("videos/original"),
            root.path().join("videos/panoptic"),
        );
        let detector = Arc::new(FakeDetector::new(root.path()));
        let dispatcher = Dispatcher::new(config.clone(), detector).unwrap();

        dispatcher.ensure_directories().await.unwrap();
        dispatcher.ensure_directories().await.unwrap();

        assert!(config.source_dir.is_dir());
        assert!(config.output_dir.is_dir());
    }

    #[tokio::test]
    async fn test_listing_failure_propagates() {
        let root = TempDir::new().unwrap();
        let config = WatcherConfig::new(root.path().join("missing"), root.path().join("out"));
        let detector = Arc::new(FakeDetector::new(root.path()));
        let dispatcher = Dispatcher::new(config, detector).unwrap();

        assert!(dispatcher.run_cycle().await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_cycle_starts_no_further_dispatch() {
        let (_root, config) = setup(&["a.mp4", "b.mp4", "c.mp4", "d.mp4"], &[]);
        let shutdown = CancellationToken::new();
        let mut fake = FakeDetector::new(&config.output_dir);
        fake.cancel_on_call = Some(shutdown.clone());
        let detector = Arc::new(fake);
        let dispatcher = Dispatcher::new(config, detector.clone()).unwrap();

        let report = dispatcher.run_cycle_until(&shutdown).await.unwrap();

        assert_eq!(detector.calls().len(), 1);
        assert_eq!(report.pending.len(), 4);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.completed(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_cycle_dispatches_nothing() {
        let (_root, config) = setup(&["a.mp4"], &[]);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let detector = Arc::new(FakeDetector::new(&config.output_dir));
        let dispatcher = Dispatcher::new(config, detector.clone()).unwrap();

        let report = dispatcher.run_cycle_until(&shutdown).await.unwrap();

        assert!(detector.calls().is_empty());
        assert!(report.records.is_empty());
    }

    #[test]
    fn test_new_rejects_invalid_layout() {
        let (_root, config) = setup(&[], &[]);
        let detector = Arc::new(FakeDetector::new(&config.output_dir));

        let zero_interval = config.clone().with_interval(Duration::ZERO);
        assert!(Dispatcher::new(zero_interval, detector.clone()).is_err());

        let same_dirs = WatcherConfig::new(&config.source_dir, &config.source_dir);
        assert!(Dispatcher::new(same_dirs, detector.clone()).is_err());

        assert!(Dispatcher::new(config, detector).is_ok());
    }
}
