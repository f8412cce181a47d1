//! Run coalescing and the background update worker.
//!
//! [`SingleFlight`] keeps at most one active indexing run per index:
//! requests arriving while a run is in progress are merged into exactly
//! one follow-up run instead of starting a second pass, and their callers
//! block until a run that started no earlier than their request finishes.
//! Pending work is queued, never dropped.
//!
//! [`UpdateWorker`] is the bounded background executor: one thread
//! draining a channel of index names, so watcher callbacks can request
//! updates without blocking on a long build.

use crate::types::IndexName;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::thread::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, Copy)]
struct RunState {
    running: bool,
    pending: bool,
}

/// How a coalesced call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// This caller executed the run itself.
    Ran,
    /// The work was covered by a run another caller executed after this
    /// request arrived.
    Merged,
}

/// At-most-one-active-run controller, keyed by index ordinal.
#[derive(Debug, Default)]
pub struct SingleFlight {
    state: Mutex<HashMap<u16, RunState>>,
    condvar: Condvar,
}

impl SingleFlight {
    /// Create an idle controller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute `f` under the single-flight discipline for `ordinal`.
    ///
    /// If no run is active this caller runs `f`. Otherwise it marks the
    /// next run pending and blocks; when it wakes it either becomes the
    /// runner of the merged follow-up pass or observes that another
    /// caller's follow-up already covered it.
    pub fn run_coalesced(&self, ordinal: u16, f: impl FnOnce()) -> RunOutcome {
        let mut joined_queue = false;
        {
            let mut state = self.state.lock();
            loop {
                let entry = state.entry(ordinal).or_default();
                if !entry.running {
                    // A queued request we joined was satisfied if the
                    // pending flag was consumed by a follow-up run.
                    if joined_queue && !entry.pending {
                        return RunOutcome::Merged;
                    }
                    entry.running = true;
                    entry.pending = false;
                    break;
                }
                if !joined_queue {
                    entry.pending = true;
                    joined_queue = true;
                }
                self.condvar.wait(&mut state);
            }
        }

        f();

        let mut state = self.state.lock();
        let entry = state.entry(ordinal).or_default();
        entry.running = false;
        self.condvar.notify_all();
        if joined_queue {
            debug!(ordinal, "merged indexing run completed");
        }
        RunOutcome::Ran
    }
}

enum WorkerMessage {
    Update(IndexName),
    Shutdown,
}

/// One-thread background executor for asynchronous update requests.
pub struct UpdateWorker {
    sender: Sender<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
}

impl UpdateWorker {
    /// Spawn the worker thread. `job` runs once per requested index name.
    pub fn spawn(job: impl Fn(IndexName) + Send + 'static) -> Self {
        let (sender, receiver): (Sender<WorkerMessage>, Receiver<WorkerMessage>) = unbounded();
        let handle = std::thread::Builder::new()
            .name("sift-update-worker".to_string())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    match message {
                        WorkerMessage::Update(name) => job(name),
                        WorkerMessage::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn update worker");

        UpdateWorker {
            sender,
            handle: Some(handle),
        }
    }

    /// Queue an asynchronous update for one index.
    pub fn request_update(&self, name: IndexName) {
        if self.sender.send(WorkerMessage::Update(name)).is_err() {
            warn!("update worker is gone; request dropped");
        }
    }
}

impl Drop for UpdateWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(WorkerMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
