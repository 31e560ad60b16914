//! Source directory scanning.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::WatcherConfig;
use crate::error::Result;

/// A source file awaiting processing, identified by its base name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputItem(String);

impl InputItem {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    /// Derive an item from a source path by stripping its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(Self::new)
    }

    pub fn identifier(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InputItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InputItem {
    fn from(identifier: &str) -> Self {
        Self::new(identifier)
    }
}

/// Lists source files and diffs them against the output directory.
#[derive(Debug, Clone)]
pub struct Scanner {
    config: WatcherConfig,
}

impl Scanner {
    pub fn new(config: WatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Items in the source directory with no output marker, in listing order.
    ///
    /// Any error while reading the directory is returned to the caller.
    pub fn list_pending(&self) -> Result<Vec<InputItem>> {
        let mut pending = Vec::new();

        for source in self.list_sources()? {
            let Some(item) = InputItem::from_path(&source) else {
                warn!("Skipping unreadable file name: {}", source.display());
                continue;
            };

            if self.is_processed(&item) {
                continue;
            }

            pending.push(item);
        }

        debug!(
            "Found {} pending items in {}",
            pending.len(),
            self.config.source_dir.display()
        );

        Ok(pending)
    }

    /// Whether the output marker for an item exists.
    pub fn is_processed(&self, item: &InputItem) -> bool {
        self.config.output_path(item.identifier()).exists()
    }

    /// Source files carrying the recognized extension.
    fn list_sources(&self) -> Result<Vec<PathBuf>> {
        let walker = WalkDir::new(&self.config.source_dir)
            .min_depth(1)
            .max_depth(1);

        let mut sources = Vec::new();
        for entry in walker {
            let entry = entry?;
            let path = entry.path();

            // Follows symlinks; broken links and directories are skipped.
            if !path.is_file() {
                continue;
            }

            if !self.config.matches_extension(path) {
                debug!("Ignoring {}", path.display());
                continue;
            }

            sources.push(path.to_path_buf());
        }

        Ok(sources)
    }
}
