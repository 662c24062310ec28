use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use cellwatch_model::{fingerprint, Baseline};
use cellwatch_store::{BaselineStore, BuildProgress, ProgressLog};
use cellwatch_xlsx::SnapshotEngine;

use crate::checker::baseline_key;
use crate::config::MonitorConfig;
use crate::memory::{MemoryMonitor, RELIEF_PAUSE};
use crate::stop::StopFlag;

/// Outcome of one file in the batch build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Baseline written.
    Ok,
    /// Nothing to do: fingerprint unchanged, or excluded by policy.
    Skip,
    /// The advisory per-file deadline elapsed while reading.
    Timeout,
    ReadError,
    SaveError,
}

#[derive(Debug, Default)]
pub struct BuildSummary {
    pub ok: usize,
    pub skipped: usize,
    pub errors: usize,
    /// False when the loop stopped early (signal or memory pressure); the
    /// progress record is preserved in that case.
    pub completed_cleanly: bool,
    pub statuses: Vec<FileStatus>,
}

impl BuildSummary {
    fn record(&mut self, status: FileStatus) {
        match status {
            FileStatus::Ok => self.ok += 1,
            FileStatus::Skip => self.skipped += 1,
            FileStatus::Timeout | FileStatus::ReadError | FileStatus::SaveError => {
                self.errors += 1
            }
        }
        self.statuses.push(status);
    }
}

/// The file currently being snapshotted, watched by the timeout supervisor.
struct InFlightFile {
    path: PathBuf,
    started: Instant,
}

/// Batch builder: snapshot every target and persist baselines, resumable
/// after interruption, supervised for per-file timeouts and memory pressure.
pub struct BaselineBuilder {
    config: MonitorConfig,
    engine: SnapshotEngine,
    store: BaselineStore,
    progress: ProgressLog,
    stop: StopFlag,
}

/// Cadence of the advisory timeout inspection.
const SUPERVISOR_INSPECT_EVERY: u32 = 10;

impl BaselineBuilder {
    pub fn new(config: &MonitorConfig, stop: StopFlag) -> Self {
        let engine = if config.use_local_cache {
            SnapshotEngine::with_cache(&config.cache_dir)
        } else {
            SnapshotEngine::new()
        };
        BaselineBuilder {
            engine,
            store: BaselineStore::new(&config.baseline_dir),
            progress: ProgressLog::new(&config.resume_log),
            config: config.clone(),
            stop,
        }
    }

    /// Run the build over `files`.
    ///
    /// `resume_decision` is consulted when a previous run left a progress
    /// record; returning true continues from the recorded index.
    /// `skip_force_baseline` excludes documents matching the configured
    /// force-baseline patterns (the bulk-scan behaviour; manual builds pass
    /// false).
    pub fn run(
        &self,
        files: &[PathBuf],
        skip_force_baseline: bool,
        resume_decision: impl FnOnce(&BuildProgress) -> bool,
    ) -> BuildSummary {
        let total = files.len();
        let mut summary = BuildSummary {
            completed_cleanly: true,
            ..BuildSummary::default()
        };
        if total == 0 {
            info!("no files need a baseline");
            return summary;
        }

        let mut start_index = 0;
        if self.config.enable_resume {
            if let Some(previous) = self.progress.load() {
                info!(
                    completed = previous.completed,
                    total = previous.total,
                    recorded_at = %previous.timestamp,
                    "found progress from an earlier build"
                );
                if resume_decision(&previous) {
                    start_index = previous.completed.min(total);
                    info!(start = start_index + 1, "resuming baseline build");
                }
            }
        }

        let memory = self
            .config
            .enable_memory_monitor
            .then(|| MemoryMonitor::new(self.config.memory_limit_mb));

        let in_flight: Arc<Mutex<Option<InFlightFile>>> = Arc::new(Mutex::new(None));
        let supervisor_done = Arc::new(AtomicBool::new(false));
        if self.config.enable_timeout {
            spawn_timeout_supervisor(
                Arc::clone(&in_flight),
                Arc::clone(&supervisor_done),
                self.config.timeout(),
            );
        }

        info!(total, start = start_index + 1, "baseline build started");
        let build_started = Instant::now();

        for (index, path) in files.iter().enumerate().skip(start_index) {
            if self.stop.is_stopped() {
                info!(at = index, "stop requested, persisting progress");
                self.persist_progress(index, total);
                summary.completed_cleanly = false;
                break;
            }

            if let Some(memory) = &memory {
                if memory.over_budget().is_some() {
                    std::thread::sleep(RELIEF_PAUSE);
                    if memory.over_budget().is_some() {
                        error!(at = index, "memory budget still exceeded, halting build");
                        self.persist_progress(index, total);
                        summary.completed_cleanly = false;
                        break;
                    }
                }
            }

            let file_started = Instant::now();
            let status = if skip_force_baseline && self.config.is_force_baseline(path) {
                info!(document = %path.display(), "excluded from bulk scan (force-baseline pattern)");
                FileStatus::Skip
            } else {
                self.build_one(path, &in_flight)
            };

            info!(
                index = index + 1,
                total,
                document = %path.display(),
                status = ?status,
                elapsed_ms = file_started.elapsed().as_millis() as u64,
                "baseline file processed"
            );
            summary.record(status);
            self.persist_progress(index + 1, total);
        }

        supervisor_done.store(true, Ordering::SeqCst);

        if summary.completed_cleanly {
            if self.config.enable_resume {
                self.progress.clear();
            }
            info!(
                ok = summary.ok,
                skipped = summary.skipped,
                errors = summary.errors,
                elapsed_secs = build_started.elapsed().as_secs(),
                "baseline build complete"
            );
        }

        summary
    }

    fn build_one(&self, path: &PathBuf, in_flight: &Mutex<Option<InFlightFile>>) -> FileStatus {
        let key = baseline_key(path);

        let stored = match self.store.load(&key) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(key = %key, error = %err, "stored baseline unreadable, rebuilding");
                None
            }
        };

        {
            let mut slot = in_flight.lock().expect("in-flight lock");
            *slot = Some(InFlightFile {
                path: path.clone(),
                started: Instant::now(),
            });
        }

        let snapshot = self.engine.snapshot(path);

        // The supervisor clears the slot when the deadline passes; finding it
        // empty means this file is to be counted as timed out.
        let timed_out = in_flight.lock().expect("in-flight lock").take().is_none();

        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(document = %path.display(), error = %err, "snapshot failed");
                return FileStatus::ReadError;
            }
        };
        if timed_out {
            return FileStatus::Timeout;
        }

        let content_hash = fingerprint(&snapshot.cells);
        if stored.is_some_and(|s| s.content_hash == content_hash) {
            return FileStatus::Skip;
        }

        let baseline = Baseline {
            last_author: snapshot.last_author,
            content_hash,
            cells: snapshot.cells,
        };
        match self.store.save(&key, &baseline) {
            Ok(()) => FileStatus::Ok,
            Err(err) => {
                warn!(document = %path.display(), error = %err, "baseline save failed");
                FileStatus::SaveError
            }
        }
    }

    fn persist_progress(&self, completed: usize, total: usize) {
        if !self.config.enable_resume {
            return;
        }
        if let Err(err) = self.progress.save(completed, total) {
            warn!(error = %err, "cannot persist build progress");
        }
    }
}

fn spawn_timeout_supervisor(
    in_flight: Arc<Mutex<Option<InFlightFile>>>,
    done: Arc<AtomicBool>,
    timeout: Duration,
) {
    std::thread::Builder::new()
        .name("timeout-supervisor".to_string())
        .spawn(move || {
            let mut ticks = 0u32;
            loop {
                std::thread::sleep(Duration::from_secs(1));
                if done.load(Ordering::SeqCst) {
                    return;
                }
                ticks += 1;
                if ticks % SUPERVISOR_INSPECT_EVERY != 0 {
                    continue;
                }

                let mut slot = in_flight.lock().expect("in-flight lock");
                if let Some(current) = slot.as_ref() {
                    let elapsed = current.started.elapsed();
                    if elapsed > timeout {
                        warn!(
                            document = %current.path.display(),
                            elapsed_secs = elapsed.as_secs(),
                            timeout_secs = timeout.as_secs(),
                            "per-file deadline exceeded, abandoning"
                        );
                        // Advisory: the reader is not interrupted, the build
                        // loop records the file as timed out when it returns.
                        *slot = None;
                    }
                }
            }
        })
        .expect("spawn timeout supervisor thread");
}
