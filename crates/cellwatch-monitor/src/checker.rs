use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use cellwatch_diff::diff_report;
use cellwatch_model::{fingerprint, Baseline};
use cellwatch_store::{AuditError, AuditLog, BaselineStore, StoreError};
use cellwatch_xlsx::{SnapshotEngine, SnapshotError};

use crate::config::MonitorConfig;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// What one snapshot-compare cycle concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// First encounter: a baseline was created, nothing to compare against.
    NewBaseline,
    /// Content fingerprint (or cell comparison) found no semantic change.
    Unchanged,
    /// Semantic changes were logged and the baseline rotated forward.
    Changed(usize),
}

/// One document's snapshot → compare → log → rotate pipeline.
pub struct ChangeChecker {
    engine: SnapshotEngine,
    store: BaselineStore,
    audit: AuditLog,
}

impl ChangeChecker {
    pub fn new(config: &MonitorConfig) -> Self {
        let engine = if config.use_local_cache {
            SnapshotEngine::with_cache(&config.cache_dir)
        } else {
            SnapshotEngine::new()
        };
        ChangeChecker {
            engine,
            store: BaselineStore::new(&config.baseline_dir),
            audit: AuditLog::new(&config.baseline_dir),
        }
    }

    pub fn store(&self) -> &BaselineStore {
        &self.store
    }

    pub fn engine(&self) -> &SnapshotEngine {
        &self.engine
    }

    /// Run one compare cycle for `path`.
    ///
    /// `silent` lowers the log level of the no-change outcomes; the settling
    /// poller runs this every few seconds and should not flood the log.
    pub fn check(&self, path: &Path, silent: bool) -> Result<CheckOutcome, CheckError> {
        let key = baseline_key(path);

        // An unreadable stored baseline is treated as absent: the document
        // gets a fresh baseline and monitoring continues.
        let stored = match self.store.load(&key) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(key = %key, error = %err, "stored baseline unreadable, rebuilding");
                None
            }
        };

        let snapshot = self.engine.snapshot(path)?;
        let current_hash = fingerprint(&snapshot.cells);
        debug!(
            document = %path.display(),
            bytes = snapshot.byte_size,
            worksheets = snapshot.worksheet_count,
            "snapshot complete"
        );

        let Some(stored) = stored else {
            let baseline = Baseline {
                last_author: snapshot.last_author,
                content_hash: current_hash,
                cells: snapshot.cells,
            };
            self.store.save(&key, &baseline)?;
            info!(document = %path.display(), "baseline created");
            return Ok(CheckOutcome::NewBaseline);
        };

        if stored.content_hash == current_hash {
            if silent {
                debug!(document = %path.display(), "no change");
            } else {
                info!(document = %path.display(), "no change");
            }
            return Ok(CheckOutcome::Unchanged);
        }

        let changes = diff_report(&stored, &snapshot.cells, &snapshot.external_refs);

        let baseline = Baseline {
            last_author: snapshot.last_author.clone(),
            content_hash: current_hash,
            cells: snapshot.cells,
        };

        if changes.is_empty() {
            // The fingerprint moved but every candidate was suppressed as
            // noise (e.g. a legacy baseline that still stored values for
            // formula cells). Rotate the baseline so the fast path holds
            // from here on, but report no change.
            self.store.save(&key, &baseline)?;
            debug!(document = %path.display(), "fingerprint churn without semantic changes");
            return Ok(CheckOutcome::Unchanged);
        }

        info!(
            document = %path.display(),
            changes = changes.len(),
            old_author = stored.last_author.as_deref().unwrap_or(""),
            new_author = baseline.last_author.as_deref().unwrap_or(""),
            "semantic change detected"
        );

        self.audit
            .append(path, baseline.last_author.as_deref(), &changes)?;
        self.store.save(&key, &baseline)?;

        Ok(CheckOutcome::Changed(changes.len()))
    }
}

/// Baselines are keyed by basename (a documented collision hazard).
pub fn baseline_key(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
