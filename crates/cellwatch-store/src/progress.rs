use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Snapshot of a batch build's position, persisted after every file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProgress {
    pub timestamp: String,
    pub completed: usize,
    pub total: usize,
}

/// The single-file resume record for the baseline builder.
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ProgressLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a previous run's record. Absent or unreadable records both mean
    /// "no resume point" — a stale or corrupt record must never block a build.
    pub fn load(&self) -> Option<BuildProgress> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "cannot read progress record");
                return None;
            }
        };
        match serde_json::from_str(&json) {
            Ok(progress) => Some(progress),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "malformed progress record");
                None
            }
        }
    }

    pub fn save(&self, completed: usize, total: usize) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let progress = BuildProgress {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            completed,
            total,
        };
        let json = serde_json::to_string(&progress).map_err(io::Error::other)?;
        fs::write(&self.path, json)
    }

    /// Remove the record; idempotent.
    pub fn clear(&self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "cannot remove progress record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_clear_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProgressLog::new(dir.path().join("baseline_progress.log"));

        assert_eq!(log.load(), None);

        log.save(37, 100).unwrap();
        let progress = log.load().unwrap();
        assert_eq!(progress.completed, 37);
        assert_eq!(progress.total, 100);
        assert!(!progress.timestamp.is_empty());

        log.clear();
        assert_eq!(log.load(), None);
        // Clearing twice is fine.
        log.clear();
    }

    #[test]
    fn malformed_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        fs::write(&path, "{not json").unwrap();

        let log = ProgressLog::new(&path);
        assert_eq!(log.load(), None);
    }
}
