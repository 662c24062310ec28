use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::{debug, warn};

use cellwatch_model::Baseline;

/// Suffix of every baseline file inside the store directory.
pub const BASELINE_SUFFIX: &str = ".baseline.json.gz";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed baseline {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("baseline serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("verification of written baseline {path} failed: {reason}")]
    Verify { path: PathBuf, reason: String },
}

/// Per-document snapshot repository: one flat directory, one file per key.
///
/// Keys are document *basenames*. Two watched documents sharing a basename
/// collide on the same baseline file; the last writer wins. This mirrors the
/// operator-visible layout of the store and is a documented hazard, not an
/// error.
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        BaselineStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn baseline_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{BASELINE_SUFFIX}"))
    }

    /// Load the stored baseline for `key`, or `None` when absent.
    pub fn load(&self, key: &str) -> Result<Option<Baseline>, StoreError> {
        let path = self.baseline_path(key);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut json = String::new();
        GzDecoder::new(file).read_to_string(&mut json)?;
        let baseline =
            serde_json::from_str(&json).map_err(|source| StoreError::Malformed { path, source })?;
        Ok(Some(baseline))
    }

    /// Atomically replace the baseline for `key`.
    ///
    /// The write goes to a sibling temporary file which is re-read and parsed
    /// before being renamed over the target. On verification failure the
    /// temporary is removed and the prior baseline stays untouched.
    pub fn save(&self, key: &str, baseline: &Baseline) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;

        let target = self.baseline_path(key);
        let temp = self.dir.join(format!(
            ".{key}{BASELINE_SUFFIX}.tmp.{}",
            std::process::id()
        ));

        let json = serde_json::to_vec(baseline).map_err(StoreError::Serialize)?;

        let result = self.write_and_verify(&temp, &json, baseline);
        if let Err(err) = result {
            if let Err(cleanup) = fs::remove_file(&temp) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(temp = %temp.display(), error = %cleanup, "could not remove temp baseline");
                }
            }
            return Err(err);
        }

        fs::rename(&temp, &target)?;
        debug!(path = %target.display(), "baseline saved");
        Ok(())
    }

    fn write_and_verify(
        &self,
        temp: &Path,
        json: &[u8],
        expected: &Baseline,
    ) -> Result<(), StoreError> {
        {
            let file = File::create(temp)?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(json)?;
            encoder.finish()?;
        }

        // Read the bytes back through the same path a future load will take.
        let mut verify_json = String::new();
        GzDecoder::new(File::open(temp)?).read_to_string(&mut verify_json)?;
        let reread: Baseline =
            serde_json::from_str(&verify_json).map_err(|err| StoreError::Verify {
                path: temp.to_path_buf(),
                reason: err.to_string(),
            })?;

        if &reread != expected {
            return Err(StoreError::Verify {
                path: temp.to_path_buf(),
                reason: "re-read baseline does not match the written snapshot".to_string(),
            });
        }

        Ok(())
    }
}
