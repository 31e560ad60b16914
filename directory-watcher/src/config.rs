//! Configuration types for the watcher.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatcherError};

/// Directory holding the videos waiting to be processed.
pub const DEFAULT_SOURCE_DIR: &str = "/data/videos/original";

/// Directory the detector writes processed videos into.
pub const DEFAULT_OUTPUT_DIR: &str = "/data/videos/panoptic";

/// Configuration for a source/output directory pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Directory scanned for new inputs.
    pub source_dir: PathBuf,

    /// Directory whose files mark an input as processed.
    pub output_dir: PathBuf,

    /// File extension (without the dot) recognized in both directories.
    pub extension: String,

    /// Seconds to sleep between scans.
    pub interval_secs: u64,

    /// Upper bound on a single detector run (None = wait forever).
    pub timeout_secs: Option<u64>,

    /// How changes in the source directory are noticed.
    pub watch_mode: WatchMode,

    /// Stop the loop on the first failed or timed out dispatch.
    pub halt_on_failure: bool,

    /// External detector invocation.
    pub detector: DetectorConfig,
}

impl WatcherConfig {
    /// Create a new config for the given directory pair.
    pub fn new(source_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    /// Set the recognized extension. Leading dots are stripped.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        let extension: String = extension.into();
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    /// Set the scan interval, rounded up to whole seconds.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_secs = whole_secs(interval);
        self
    }

    /// Set the detector timeout, rounded up to whole seconds.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_secs = timeout.map(whole_secs);
        self
    }

    /// Set the watch mode.
    pub fn with_mode(mut self, mode: WatchMode) -> Self {
        self.watch_mode = mode;
        self
    }

    /// Halt the loop on the first failed dispatch.
    pub fn halt_on_failure(mut self) -> Self {
        self.halt_on_failure = true;
        self
    }

    /// Set the detector command.
    pub fn with_detector(mut self, detector: DetectorConfig) -> Self {
        self.detector = detector;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Path of the output marker for an identifier.
    pub fn output_path(&self, identifier: &str) -> PathBuf {
        self.output_dir.join(format!("{identifier}.{}", self.extension))
    }

    /// Whether a path carries the recognized extension.
    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == self.extension)
    }

    /// Check the config for values the watcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.validate_layout()?;

        if self.detector.program.trim().is_empty() {
            return Err(WatcherError::Config("detector program is not set".to_string()));
        }

        Ok(())
    }

    /// Like [`validate`](Self::validate), without requiring a detector
    /// command. Used when the detector is supplied in-process.
    pub fn validate_layout(&self) -> Result<()> {
        if self.extension.is_empty() || self.extension.contains('.') {
            return Err(WatcherError::Config(format!(
                "invalid extension: {:?}",
                self.extension
            )));
        }

        if self.interval_secs == 0 {
            return Err(WatcherError::Config("scan interval must not be zero".to_string()));
        }

        if self.timeout_secs == Some(0) {
            return Err(WatcherError::Config("detector timeout must not be zero".to_string()));
        }

        if self.source_dir == self.output_dir {
            return Err(WatcherError::Config(format!(
                "source and output directories are the same: {}",
                self.source_dir.display()
            )));
        }

        Ok(())
    }
}

/// Seconds in `duration`, rounding any fraction up.
fn whole_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from(DEFAULT_SOURCE_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            extension: "mp4".to_string(),
            interval_secs: 60,
            timeout_secs: Some(2 * 60 * 60),
            watch_mode: WatchMode::default(),
            halt_on_failure: false,
            detector: DetectorConfig::default(),
        }
    }
}

/// How the external detector is launched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Program to run.
    pub program: String,

    /// Arguments. `{id}` is replaced by the identifier; if no argument
    /// contains it, the identifier is appended.
    pub args: Vec<String>,
}

impl DetectorConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// How changes to the source directory are noticed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// Fixed-interval scans only.
    #[default]
    Scheduled,

    /// Fixed-interval scans, woken early by filesystem notifications.
    Realtime,
}
