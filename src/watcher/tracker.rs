//! Modification-time tracking for the watched file set.
//!
//! Polling is host-driven and single-pass: every tracked file is checked on
//! each poll, so several files changing in the same tick are all detected in
//! that tick. Each change is reported exactly once, at the first poll after
//! it occurs.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::error::WatchError;

/// Path -> last-seen modification time for every watched file.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    times: HashMap<PathBuf, SystemTime>,
}

/// Outcome of one polling pass.
#[derive(Debug, Default)]
pub struct PollReport {
    /// Files whose mtime differs from the stored value.
    pub changed: Vec<PathBuf>,
    /// Files that disappeared since the last poll; dropped from tracking.
    pub missing: Vec<PathBuf>,
}

fn mtime(path: &Path) -> Result<SystemTime, WatchError> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| WatchError::Stat {
            path: path.to_path_buf(),
            source: e,
        })
}

impl ChangeTracker {
    /// Record the current mtime of every file in the set.
    ///
    /// The entry for the FIRST file is then forced to `UNIX_EPOCH`, which is
    /// guaranteed to differ from its real mtime, so the very first poll
    /// always reports a change. That is how load-on-watch-start works
    /// without a separate code path.
    pub fn snapshot(files: &[PathBuf]) -> Self {
        let mut times = HashMap::new();
        for file in files {
            match mtime(file) {
                Ok(time) => {
                    times.insert(file.clone(), time);
                }
                Err(e) => tracing::warn!(target: "tracker", "skipping at snapshot: {e}"),
            }
        }
        if let Some(first) = files.first() {
            times.insert(first.clone(), SystemTime::UNIX_EPOCH);
        }
        Self { times }
    }

    /// Check every tracked file once, updating stored times as it goes.
    ///
    /// A file that can no longer be stat'ed is reported as missing and
    /// dropped from tracking; the poll loop itself never fails.
    pub fn poll(&mut self) -> PollReport {
        let mut report = PollReport::default();
        let paths: Vec<PathBuf> = self.times.keys().cloned().collect();
        for path in paths {
            match mtime(&path) {
                Ok(current) => {
                    if let Some(stored) = self.times.get_mut(&path) {
                        if *stored != current {
                            *stored = current;
                            report.changed.push(path);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "tracker", "dropping from watch set: {e}");
                    self.times.remove(&path);
                    report.missing.push(path);
                }
            }
        }
        report
    }

    /// Reconcile the tracked set after a reload: files added to the package
    /// enter with their current mtime, vanished files are dropped.
    pub fn sync(&mut self, files: &[PathBuf]) {
        self.times.retain(|path, _| files.contains(path));
        for file in files {
            if !self.times.contains_key(file) {
                if let Ok(time) = mtime(file) {
                    self.times.insert(file.clone(), time);
                }
            }
        }
    }

    pub fn tracks(&self, path: &Path) -> bool {
        self.times.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}
