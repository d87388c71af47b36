use crate::model::Snapshot;
use crate::state::{load_snapshot, RunState};
use crate::supervisor::send_interrupt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where a renderer gets its snapshots from.
pub trait SnapshotSource {
    /// Current snapshot, or `None` while nothing readable exists yet.
    fn current(&mut self) -> Option<Snapshot>;

    /// Re-read on the next call regardless of any refresh schedule.
    fn refresh(&mut self) {}

    /// Whether the renderer should leave on its own once the run is over.
    fn exits_when_finished(&self) -> bool {
        false
    }
}

/// Forwards a user's cancel key to whoever owns the child process.
pub trait CancelRelay {
    /// Returns a status message for the UI.
    fn cancel(&self, current: Option<&Snapshot>) -> String;
}

impl SnapshotSource for Arc<RunState> {
    fn current(&mut self) -> Option<Snapshot> {
        Some(RunState::snapshot(self))
    }

    fn exits_when_finished(&self) -> bool {
        true
    }
}

impl CancelRelay for Arc<RunState> {
    fn cancel(&self, _current: Option<&Snapshot>) -> String {
        if self.status().is_terminal() {
            "Run already finished".to_string()
        } else if RunState::request_cancel(self) {
            "Cancel requested; waiting for CP2K to stop".to_string()
        } else {
            "Cancel already requested".to_string()
        }
    }
}

/// Polls a snapshot file written by another process.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    interval: Duration,
    last_load: Option<Instant>,
    cached: Option<Snapshot>,
}

impl FileSource {
    pub fn new(path: PathBuf, interval: Duration) -> Self {
        Self {
            path,
            interval,
            last_load: None,
            cached: None,
        }
    }
}

impl SnapshotSource for FileSource {
    fn current(&mut self) -> Option<Snapshot> {
        let due = self
            .last_load
            .map(|t| t.elapsed() >= self.interval)
            .unwrap_or(true);
        if due {
            self.last_load = Some(Instant::now());
            // A half-visible or missing file keeps the previous view.
            if let Some(snap) = load_snapshot(&self.path) {
                self.cached = Some(snap);
            }
        }
        self.cached.clone()
    }

    fn refresh(&mut self) {
        self.last_load = None;
    }
}

/// A fixed snapshot, e.g. rebuilt from a finished log.
#[derive(Debug, Clone)]
pub struct StaticSource(pub Snapshot);

impl SnapshotSource for StaticSource {
    fn current(&mut self) -> Option<Snapshot> {
        Some(self.0.clone())
    }
}

/// Interrupts the pid recorded in the snapshot while the run is still active.
#[derive(Debug, Default, Clone, Copy)]
pub struct PidRelay;

impl CancelRelay for PidRelay {
    fn cancel(&self, current: Option<&Snapshot>) -> String {
        let Some(snap) = current else {
            return "No run to cancel yet".to_string();
        };
        if snap.is_terminal() {
            return "Run already finished".to_string();
        }
        let Some(pid) = snap.pid else {
            return "Run has no pid yet".to_string();
        };
        match send_interrupt(pid) {
            Ok(()) => format!("Sent SIGINT to pid {pid}"),
            Err(e) => format!("Could not signal pid {pid}: {e}"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoCancel;

impl CancelRelay for NoCancel {
    fn cancel(&self, _current: Option<&Snapshot>) -> String {
        "Nothing to cancel".to_string()
    }
}
