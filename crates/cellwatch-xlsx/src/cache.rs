use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Copy-through cache for documents on slow (network) storage.
///
/// Sources are copied next to each other in a single flat directory, keyed by
/// a digest of the absolute source path plus the basename so that identically
/// named documents from different trees do not collide. The copy is skipped
/// when the cached file is at least as new as the source.
///
/// Cache failures are never fatal: callers get the source path back and work
/// directly against it.
pub struct SnapshotCache {
    dir: PathBuf,
}

impl SnapshotCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SnapshotCache { dir: dir.into() }
    }

    /// The path reads should go through: the cached copy, or the source
    /// itself when caching fails.
    pub fn resolve(&self, source: &Path) -> PathBuf {
        match self.copy_through(source) {
            Ok(cached) => cached,
            Err(err) => {
                warn!(source = %source.display(), error = %err, "cache copy failed, reading source directly");
                source.to_path_buf()
            }
        }
    }

    fn copy_through(&self, source: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let cached = self.dir.join(cache_file_name(source));

        let source_meta = fs::metadata(source)?;
        if let Ok(cache_meta) = fs::metadata(&cached) {
            if let (Ok(cache_mtime), Ok(source_mtime)) =
                (cache_meta.modified(), source_meta.modified())
            {
                if cache_mtime >= source_mtime {
                    debug!(cached = %cached.display(), "cache hit");
                    return Ok(cached);
                }
            }
        }

        debug!(
            source = %source.display(),
            cached = %cached.display(),
            bytes = source_meta.len(),
            "copying to cache"
        );
        fs::copy(source, &cached)?;
        Ok(cached)
    }
}

fn cache_file_name(source: &Path) -> String {
    let absolute = source
        .canonicalize()
        .unwrap_or_else(|_| source.to_path_buf());

    let mut hasher = Sha256::new();
    hasher.update(absolute.to_string_lossy().as_bytes());
    let digest = hasher.finalize();

    let mut prefix = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        prefix.push_str(&format!("{byte:02x}"));
    }

    let basename = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{prefix}_{basename}")
}
