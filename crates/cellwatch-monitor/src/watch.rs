use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{EventKind, RecursiveMode, Watcher};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::checker::{ChangeChecker, CheckOutcome};
use crate::config::MonitorConfig;
use crate::poller::SettlingPoller;
use crate::stop::StopFlag;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("filesystem watcher error: {0}")]
    Notify(#[from] notify::Error),
    #[error("none of the configured watch roots could be subscribed")]
    NoWatchRoots,
}

/// Per-path admission control: at most one snapshot-compare in flight per
/// document. A second event arriving while one runs is dropped; the settling
/// poller covers whatever that event would have seen.
#[derive(Clone, Default)]
pub struct InFlightSet {
    inner: Arc<Mutex<HashSet<PathBuf>>>,
}

/// Membership token; the path is released when the ticket drops, on every
/// exit path including panics.
pub struct InFlightTicket {
    inner: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl InFlightSet {
    pub fn new() -> Self {
        InFlightSet::default()
    }

    pub fn try_acquire(&self, path: &Path) -> Option<InFlightTicket> {
        let mut set = self.inner.lock().expect("in-flight lock");
        if !set.insert(path.to_path_buf()) {
            return None;
        }
        Some(InFlightTicket {
            inner: Arc::clone(&self.inner),
            path: path.to_path_buf(),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("in-flight lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        self.inner
            .lock()
            .expect("in-flight lock")
            .remove(&self.path);
    }
}

struct MonitorCore {
    config: MonitorConfig,
    checker: Arc<ChangeChecker>,
    poller: SettlingPoller,
    in_flight: InFlightSet,
    event_counter: Mutex<u64>,
    stop: StopFlag,
}

/// The event intake and dispatch loop.
pub struct Monitor {
    core: Arc<MonitorCore>,
}

const EVENT_LOOP_TICK: Duration = Duration::from_millis(500);

impl Monitor {
    pub fn new(config: MonitorConfig, stop: StopFlag) -> Self {
        let checker = Arc::new(ChangeChecker::new(&config));

        let probe_checker = Arc::clone(&checker);
        let poller = SettlingPoller::new(
            config.poll_interval(),
            config.poll_window(),
            move |path: &Path| {
                matches!(
                    probe_checker.check(path, true),
                    Ok(CheckOutcome::Changed(_))
                )
            },
        );

        Monitor {
            core: Arc::new(MonitorCore {
                config,
                checker,
                poller,
                in_flight: InFlightSet::new(),
                event_counter: Mutex::new(0),
                stop,
            }),
        }
    }

    /// Committed event count (only semantic changes consume a number).
    pub fn event_count(&self) -> u64 {
        *self.core.event_counter.lock().expect("event counter lock")
    }

    pub fn poller(&self) -> &SettlingPoller {
        &self.core.poller
    }

    /// Subscribe to the configured roots and dispatch modify events until the
    /// stop flag is raised.
    pub fn run(&self) -> Result<(), MonitorError> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |result| {
            let _ = tx.send(result);
        })?;

        let mut attached = 0usize;
        for root in &self.core.config.watch_dirs {
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => {
                    info!(root = %root.display(), "watching");
                    attached += 1;
                }
                Err(err) => error!(root = %root.display(), error = %err, "cannot watch root"),
            }
        }
        if attached == 0 {
            return Err(MonitorError::NoWatchRoots);
        }

        info!("monitoring started");
        loop {
            if self.core.stop.is_stopped() {
                break;
            }
            match rx.recv_timeout(EVENT_LOOP_TICK) {
                Ok(Ok(event)) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        continue;
                    }
                    for path in event.paths {
                        if self.core.config.is_watched_file(&path) && path.is_file() {
                            self.dispatch(path);
                        }
                    }
                }
                Ok(Err(err)) => warn!(error = %err, "watcher error"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.core.poller.stop();
        drop(watcher);
        info!("monitoring stopped");
        Ok(())
    }

    /// Hand one accepted event to a worker thread, subject to the per-path
    /// in-flight guard. Distinct paths proceed independently.
    fn dispatch(&self, path: PathBuf) {
        let Some(ticket) = self.core.in_flight.try_acquire(&path) else {
            debug!(
                document = %path.display(),
                "check already in flight, event dropped (settling poller covers it)"
            );
            return;
        };

        let core = Arc::clone(&self.core);
        std::thread::spawn(move || {
            core.run_check(&path);
            drop(ticket);
        });
    }
}

impl MonitorCore {
    fn run_check(&self, path: &Path) {
        match self.checker.check(path, false) {
            Ok(CheckOutcome::Changed(change_count)) => {
                let event_number = {
                    let mut counter = self.event_counter.lock().expect("event counter lock");
                    *counter += 1;
                    *counter
                };
                info!(
                    event = event_number,
                    document = %path.display(),
                    changes = change_count,
                    "change event committed"
                );
                self.poller.start_polling(path);
            }
            Ok(CheckOutcome::NewBaseline | CheckOutcome::Unchanged) => {}
            Err(err) => {
                // Component errors are status markers here; the monitor keeps
                // running and the next event retries.
                warn!(document = %path.display(), error = %err, "change check failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_minimal_workbook(path: &Path, cell_value: &str) {
        let cursor = std::io::Cursor::new(Vec::new());
        let mut zip = zip::ZipWriter::new(cursor);
        let options = zip::write::FileOptions::<()>::default();

        let entries = [
            (
                "xl/workbook.xml",
                r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#.to_string(),
            ),
            (
                "xl/_rels/workbook.xml.rels",
                r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#.to_string(),
            ),
            (
                "xl/worksheets/sheet1.xml",
                format!(
                    r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>{cell_value}</t></is></c></row></sheetData></worksheet>"#
                ),
            ),
        ];
        for (name, content) in entries {
            zip.start_file(name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        let bytes = zip.finish().unwrap().into_inner();
        std::fs::write(path, bytes).unwrap();
    }

    fn test_monitor(dir: &Path) -> Monitor {
        let config = MonitorConfig {
            watch_dirs: vec![dir.to_path_buf()],
            baseline_dir: dir.join("baselines"),
            use_local_cache: false,
            enable_resume: false,
            poll_interval_secs: 1,
            poll_window_secs: 2,
            ..MonitorConfig::default()
        };
        Monitor::new(config, StopFlag::new())
    }

    #[test]
    fn in_flight_set_admits_one_ticket_per_path() {
        let set = InFlightSet::new();
        let path = Path::new("/w/a.xlsx");

        let ticket = set.try_acquire(path).unwrap();
        assert!(set.try_acquire(path).is_none());
        assert!(set.try_acquire(Path::new("/w/b.xlsx")).is_some());

        drop(ticket);
        assert!(set.try_acquire(path).is_some());
    }

    #[test]
    fn in_flight_set_under_a_burst_admits_exactly_one() {
        let set = InFlightSet::new();
        let path = PathBuf::from("/w/burst.xlsx");

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..10)
                .map(|_| {
                    let set = set.clone();
                    let path = path.clone();
                    scope.spawn(move || {
                        match set.try_acquire(&path) {
                            Some(ticket) => {
                                // Hold the ticket while the burst lands.
                                std::thread::sleep(Duration::from_millis(50));
                                drop(ticket);
                                1
                            }
                            None => 0,
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 1);
        assert!(set.is_empty());
    }

    #[test]
    fn event_numbers_are_consumed_only_by_semantic_changes() {
        let dir = tempfile::tempdir().unwrap();
        let document = dir.path().join("Tracked.xlsx");
        write_minimal_workbook(&document, "hello");

        let monitor = test_monitor(dir.path());

        // First sight builds the baseline; no event number.
        monitor.core.run_check(&document);
        assert_eq!(monitor.event_count(), 0);

        // Unchanged re-check; still no event number.
        monitor.core.run_check(&document);
        assert_eq!(monitor.event_count(), 0);
        assert!(!monitor.poller().is_tracking(&document));

        // A real edit commits an event and starts the settling poller.
        write_minimal_workbook(&document, "world");
        monitor.core.run_check(&document);
        assert_eq!(monitor.event_count(), 1);
        assert!(monitor.poller().is_tracking(&document));

        monitor.poller().stop();
    }

    #[test]
    fn failed_checks_do_not_consume_event_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let document = dir.path().join("Broken.xlsx");
        std::fs::write(&document, b"not a workbook").unwrap();

        let monitor = test_monitor(dir.path());
        monitor.core.run_check(&document);
        assert_eq!(monitor.event_count(), 0);
        monitor.poller().stop();
    }

    #[test]
    fn no_watchable_roots_is_an_initialisation_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = MonitorConfig {
            watch_dirs: vec![dir.path().join("does-not-exist")],
            baseline_dir: dir.path().join("baselines"),
            use_local_cache: false,
            ..MonitorConfig::default()
        };
        let monitor = Monitor::new(config, StopFlag::new());
        assert!(matches!(monitor.run(), Err(MonitorError::NoWatchRoots)));
    }
}
