use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

use cellwatch_xlsx::{LOCK_FILE_PREFIX, SUPPORTED_EXTENSIONS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The monitor's closed configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Roots to observe recursively.
    pub watch_dirs: Vec<PathBuf>,
    /// Where baselines and audit logs are written.
    pub baseline_dir: PathBuf,
    pub use_local_cache: bool,
    pub cache_dir: PathBuf,
    pub enable_timeout: bool,
    /// Advisory per-file deadline during the baseline build.
    pub timeout_seconds: u64,
    pub enable_memory_monitor: bool,
    pub memory_limit_mb: u64,
    pub enable_resume: bool,
    pub resume_log: PathBuf,
    /// Build baselines for every file under `watch_dirs` at startup; when
    /// false, only `manual_targets` are built.
    pub scan_all_mode: bool,
    pub manual_targets: Vec<PathBuf>,
    /// Substring patterns (case-insensitive) of documents that only get a
    /// baseline on their first modify event, not during the bulk scan.
    pub force_baseline_patterns: Vec<String>,
    pub poll_interval_secs: u64,
    pub poll_window_secs: u64,
    /// Lowercase file extensions, without the dot.
    pub supported_extensions: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            watch_dirs: Vec::new(),
            baseline_dir: PathBuf::from("./excel_watch_log"),
            use_local_cache: true,
            cache_dir: PathBuf::from("./excel_cache"),
            enable_timeout: true,
            timeout_seconds: 120,
            enable_memory_monitor: true,
            memory_limit_mb: 2048,
            enable_resume: true,
            resume_log: PathBuf::from("./baseline_progress.log"),
            scan_all_mode: true,
            manual_targets: Vec::new(),
            force_baseline_patterns: Vec::new(),
            poll_interval_secs: 5,
            poll_window_secs: 15,
            supported_extensions: SUPPORTED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_window(&self) -> Duration {
        Duration::from_secs(self.poll_window_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Is `path` a document the monitor cares about? Directories, foreign
    /// extensions and the host application's lock files are not.
    pub fn is_watched_file(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.starts_with(LOCK_FILE_PREFIX) {
            return false;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.supported_extensions.iter().any(|s| *s == ext)
    }

    pub fn is_force_baseline(&self, path: &Path) -> bool {
        if self.force_baseline_patterns.is_empty() {
            return false;
        }
        let lower = path.to_string_lossy().to_lowercase();
        self.force_baseline_patterns
            .iter()
            .any(|pattern| lower.contains(&pattern.to_lowercase()))
    }

    /// Resolve the startup build targets: every watched file under the scan
    /// roots (`scan_all_mode`) or under the manual target list. List entries
    /// may be files or directories. The result is sorted for deterministic
    /// build order.
    pub fn collect_targets(&self) -> Vec<PathBuf> {
        let roots = if self.scan_all_mode {
            &self.watch_dirs
        } else {
            &self.manual_targets
        };

        let mut files = Vec::new();
        for root in roots {
            if root.is_file() {
                if self.is_watched_file(root) {
                    files.push(root.clone());
                }
                continue;
            }
            if !root.is_dir() {
                warn!(root = %root.display(), "scan root does not exist, skipping");
                continue;
            }
            for entry in WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() && self.is_watched_file(entry.path()) {
                    files.push(entry.path().to_path_buf());
                }
            }
        }

        files.sort();
        files
    }
}
