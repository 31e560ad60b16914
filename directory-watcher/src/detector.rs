//! External detector invocation.
//!
//! The detector turns a source video into its processed counterpart in the
//! output directory. The watcher only awaits it and never inspects what it
//! produced.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::error::{Result, WatcherError};

/// Placeholder replaced by the identifier in detector arguments.
pub const IDENTIFIER_PLACEHOLDER: &str = "{id}";

/// Characters of stderr kept in failure reasons.
const STDERR_TAIL_CHARS: usize = 2048;

/// Trait for detectors.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Get the name of this detector.
    fn name(&self) -> &str;

    /// Process one identifier, returning once the detector has finished.
    async fn process(&self, identifier: &str) -> Result<()>;
}

/// Detector that runs an external program per identifier.
///
/// The child is killed if the returned future is dropped, which is how
/// dispatch timeouts stop a hung detector.
#[derive(Debug, Clone)]
pub struct CommandDetector {
    config: DetectorConfig,
}

impl CommandDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        if config.program.trim().is_empty() {
            return Err(WatcherError::Config("detector program is not set".to_string()));
        }
        Ok(Self { config })
    }

    /// Arguments for one run with the identifier substituted in.
    pub fn args_for(&self, identifier: &str) -> Vec<String> {
        let mut substituted = false;
        let mut args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|arg| {
                if arg.contains(IDENTIFIER_PLACEHOLDER) {
                    substituted = true;
                    arg.replace(IDENTIFIER_PLACEHOLDER, identifier)
                } else {
                    arg.clone()
                }
            })
            .collect();

        if !substituted {
            args.push(identifier.to_string());
        }
        args
    }
}

#[async_trait]
impl Detector for CommandDetector {
    fn name(&self) -> &str {
        &self.config.program
    }

    async fn process(&self, identifier: &str) -> Result<()> {
        let args = self.args_for(identifier);
        debug!("Running {} {:?}", self.config.program, args);

        let output = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                WatcherError::Detector(format!("failed to spawn {}: {e}", self.config.program))
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr_tail(stderr.trim());

        if tail.is_empty() {
            Err(WatcherError::Detector(format!(
                "{} exited with {}",
                self.config.program, output.status
            )))
        } else {
            Err(WatcherError::Detector(format!(
                "{} exited with {}: {tail}",
                self.config.program, output.status
            )))
        }
    }
}

/// Last [`STDERR_TAIL_CHARS`] characters of `stderr`.
fn stderr_tail(stderr: &str) -> &str {
    match stderr.char_indices().rev().nth(STDERR_TAIL_CHARS - 1) {
        Some((idx, _)) => &stderr[idx..],
        None => stderr,
    }
}
