use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Decides when a burst of modifications to a document has ended.
///
/// After a change is confirmed, the document is re-checked every `interval`
/// until it has been quiet for a whole `window`; a further change during the
/// window resets it. One worker thread consumes a time-ordered heap of ticks;
/// the probe (a silent snapshot-compare) always runs outside the tracker lock,
/// and being single-threaded it is never re-entered for a path.
pub struct SettlingPoller {
    inner: Arc<PollerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

type ChangeProbe = Box<dyn Fn(&Path) -> bool + Send + Sync>;

struct PollerInner {
    interval: Duration,
    window: Duration,
    probe: ChangeProbe,
    state: Mutex<PollerState>,
    wakeup: Condvar,
}

#[derive(Default)]
struct PollerState {
    tasks: HashMap<PathBuf, PollTask>,
    queue: BinaryHeap<Reverse<(Instant, PathBuf)>>,
    shutdown: bool,
}

struct PollTask {
    remaining: Duration,
    next_tick: Instant,
}

impl SettlingPoller {
    pub fn new(
        interval: Duration,
        window: Duration,
        probe: impl Fn(&Path) -> bool + Send + Sync + 'static,
    ) -> Self {
        let inner = Arc::new(PollerInner {
            interval,
            window,
            probe: Box::new(probe),
            state: Mutex::new(PollerState::default()),
            wakeup: Condvar::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("settling-poller".to_string())
            .spawn(move || worker_loop(worker_inner))
            .expect("spawn settling poller thread");

        SettlingPoller {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Start (or restart) the settling clock for a path.
    ///
    /// Any pending tick for the path is superseded and the quiet window
    /// starts over.
    pub fn start_polling(&self, path: &Path) {
        let mut state = self.inner.state.lock().expect("poller lock");
        if state.shutdown {
            return;
        }

        let next_tick = Instant::now() + self.inner.interval;
        state.tasks.insert(
            path.to_path_buf(),
            PollTask {
                remaining: self.inner.window,
                next_tick,
            },
        );
        state.queue.push(Reverse((next_tick, path.to_path_buf())));
        info!(
            document = %path.display(),
            interval_secs = self.inner.interval.as_secs_f64(),
            window_secs = self.inner.window.as_secs_f64(),
            "settling poll started"
        );
        self.inner.wakeup.notify_one();
    }

    pub fn is_tracking(&self, path: &Path) -> bool {
        self.inner
            .state
            .lock()
            .expect("poller lock")
            .tasks
            .contains_key(path)
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.state.lock().expect("poller lock").tasks.len()
    }

    /// Cancel all outstanding ticks and stop the worker. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock().expect("poller lock");
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.tasks.clear();
            state.queue.clear();
        }
        self.inner.wakeup.notify_all();

        if let Some(worker) = self.worker.lock().expect("poller lock").take() {
            if worker.join().is_err() {
                warn!("settling poller worker panicked");
            }
        }
    }
}

impl Drop for SettlingPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(inner: Arc<PollerInner>) {
    let mut state = inner.state.lock().expect("poller lock");
    loop {
        if state.shutdown {
            return;
        }

        let now = Instant::now();
        let next_deadline = state.queue.peek().map(|entry| entry.0 .0);
        match next_deadline {
            None => {
                state = inner.wakeup.wait(state).expect("poller lock");
                continue;
            }
            Some(when) if when > now => {
                let (guard, _timed_out) = inner
                    .wakeup
                    .wait_timeout(state, when - now)
                    .expect("poller lock");
                state = guard;
                continue;
            }
            Some(_) => {}
        }

        let Reverse((tick, path)) = state.queue.pop().expect("due queue entry");

        // Heap entries are never removed on reschedule; a tick that does not
        // match the task's current schedule is stale and dropped.
        let current = matches!(state.tasks.get(&path), Some(task) if task.next_tick == tick);
        if !current {
            continue;
        }

        drop(state);
        let changed = (inner.probe)(&path);
        state = inner.state.lock().expect("poller lock");

        if state.shutdown {
            return;
        }
        // The path may have been rescheduled (a new event arrived) or
        // dropped while the probe ran; leave the newer schedule alone.
        let Some(task) = state.tasks.get_mut(&path) else {
            continue;
        };
        if task.next_tick != tick {
            continue;
        }

        if changed {
            task.remaining = inner.window;
            debug!(document = %path.display(), "still changing, settling window reset");
        } else {
            task.remaining = task.remaining.saturating_sub(inner.interval);
        }

        if task.remaining > Duration::ZERO {
            let next_tick = Instant::now() + inner.interval;
            task.next_tick = next_tick;
            state.queue.push(Reverse((next_tick, path.clone())));
        } else {
            state.tasks.remove(&path);
            info!(document = %path.display(), "document settled");
        }
    }
}
