//! Dispatch outcomes and per-cycle reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scanner::InputItem;

/// How a single dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The detector returned successfully.
    Completed,

    /// The detector reported an error.
    Failed { reason: String },

    /// The detector did not finish within the timeout.
    TimedOut,

    /// Another dispatch held the guard; nothing was run.
    Dropped,
}

impl DispatchOutcome {
    /// Whether the outcome should count as a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::TimedOut)
    }

    /// Human-readable failure reason, if any.
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Failed { reason } => Some(reason.clone()),
            Self::TimedOut => Some("timed out".to_string()),
            Self::Completed | Self::Dropped => None,
        }
    }
}

/// Record of one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    /// Identifier handed to the detector.
    pub identifier: String,

    /// How the dispatch ended.
    pub outcome: DispatchOutcome,

    /// When the dispatch started.
    pub started_at: DateTime<Utc>,

    /// Time spent in the detector.
    pub duration_ms: u64,
}

/// Result of one scan-and-dispatch cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    /// Items found pending at the start of the cycle.
    pub pending: Vec<InputItem>,

    /// One record per dispatch attempted in the cycle.
    pub records: Vec<DispatchRecord>,
}

impl CycleReport {
    /// Identifiers the detector was actually invoked with.
    pub fn dispatched(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.outcome != DispatchOutcome::Dropped)
            .map(|r| r.identifier.as_str())
            .collect()
    }

    /// Number of dispatches that completed.
    pub fn completed(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome == DispatchOutcome::Completed)
            .count()
    }

    /// Number of dispatches that failed or timed out.
    pub fn failed(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_failure()).count()
    }
}
