//! # Directory Watcher
//!
//! Watches a directory of source videos and hands every video that has no
//! processed counterpart yet to an external detector, one at a time.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  WatcherConfig ──► Scanner ──► Dispatcher ──► Detector          │
//! │                       │            │                            │
//! │                       ▼            ▼                            │
//! │                  InputItem   DispatchGuard                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An input `<id>.<ext>` in the source directory counts as processed once
//! `<id>.<ext>` exists in the output directory. Nothing else is tracked.

pub mod config;
pub mod detector;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod guard;
pub mod scanner;
pub mod watcher;

pub use config::{DetectorConfig, WatchMode, WatcherConfig};
pub use detector::{CommandDetector, Detector};
pub use dispatcher::Dispatcher;
pub use error::{Result, WatcherError};
pub use event::{CycleReport, DispatchOutcome, DispatchRecord};
pub use guard::{DispatchGuard, GuardState};
pub use scanner::{InputItem, Scanner};
pub use watcher::DirectoryWatcher;

// Re-exported so callers can build shutdown tokens without a direct dependency.
pub use tokio_util::sync::CancellationToken;
