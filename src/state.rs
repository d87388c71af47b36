//! Shared run state: the single source of truth for every renderer.
//!
//! One `parking_lot::Mutex` guards all mutable fields so that a snapshot never observes a
//! half-applied update. Persistence to the snapshot file happens outside that lock and is
//! serialized by a second lock, so a slow disk never stalls the reader task.

use crate::extractor::TelemetrySink;
use crate::model::{Field, Fields, OpenRecord, RunStatus, Snapshot, TelemetryRecord};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const TAIL_CAPACITY: usize = 100;

/// Immutable description of the run, fixed at launch.
#[derive(Debug, Clone, Default)]
pub struct RunMeta {
    pub project: String,
    pub logfile: PathBuf,
    pub input_path: Option<PathBuf>,
    pub profile: Option<String>,
    pub mode: Option<String>,
}

/// Parallel per-field series; every vector always has the same length as `steps`.
#[derive(Debug, Clone)]
struct MetricSeries {
    steps: Vec<Option<f64>>,
    values: [Vec<Option<f64>>; Field::COUNT],
}

impl Default for MetricSeries {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            values: std::array::from_fn(|_| Vec::new()),
        }
    }
}

impl MetricSeries {
    fn push(&mut self, record: &TelemetryRecord) {
        self.steps.push(Some(record.step as f64));
        for field in Field::ALL {
            self.values[field as usize].push(record.get(field));
        }
    }

    fn amend_last(&mut self, patch: &Fields) {
        for (field, value) in patch.iter() {
            if let Some(slot) = self.values[field as usize].last_mut() {
                *slot = Some(value);
            }
        }
    }

    fn to_map(&self) -> BTreeMap<String, Vec<Option<f64>>> {
        let mut map = BTreeMap::new();
        map.insert("step".to_string(), self.steps.clone());
        for field in Field::ALL {
            map.insert(field.key().to_string(), self.values[field as usize].clone());
        }
        map
    }
}

#[derive(Debug)]
struct Inner {
    status: RunStatus,
    pid: Option<u32>,
    return_code: Option<i32>,
    started: Instant,
    started_at: Option<String>,
    finished: Option<Instant>,
    tail: VecDeque<String>,
    records: Vec<TelemetryRecord>,
    series: MetricSeries,
    open: Option<OpenRecord>,
    cancel_requested: bool,
    state_file: Option<PathBuf>,
    persist_interval: Duration,
    last_persist: Option<Instant>,
}

impl Inner {
    fn snapshot(&self, meta: &RunMeta) -> Snapshot {
        let end = self.finished.unwrap_or_else(Instant::now);
        Snapshot {
            project: meta.project.clone(),
            logfile: meta.logfile.display().to_string(),
            input_path: meta.input_path.as_ref().map(|p| p.display().to_string()),
            profile: meta.profile.clone(),
            mode: meta.mode.clone(),
            status: Some(self.status),
            started_at: self.started_at.clone(),
            runtime_seconds: end.duration_since(self.started).as_secs_f64(),
            return_code: self.return_code,
            pid: self.pid,
            tail: self.tail.iter().cloned().collect(),
            metrics: self.series.to_map(),
            blocks: self.records.clone(),
        }
    }
}

pub struct RunState {
    meta: RunMeta,
    inner: Mutex<Inner>,
    persist_lock: Mutex<()>,
}

impl RunState {
    pub fn new(meta: RunMeta) -> Self {
        let started_at = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .ok();
        Self {
            meta,
            inner: Mutex::new(Inner {
                status: RunStatus::Launching,
                pid: None,
                return_code: None,
                started: Instant::now(),
                started_at,
                finished: None,
                tail: VecDeque::with_capacity(TAIL_CAPACITY),
                records: Vec::new(),
                series: MetricSeries::default(),
                open: None,
                cancel_requested: false,
                state_file: None,
                persist_interval: Duration::from_millis(500),
                last_persist: None,
            }),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn with_state_file(self, path: Option<PathBuf>) -> Self {
        self.inner.lock().state_file = path;
        self
    }

    pub fn with_persist_interval(self, interval: Duration) -> Self {
        self.inner.lock().persist_interval = interval;
        self
    }

    pub fn state_file(&self) -> Option<PathBuf> {
        self.inner.lock().state_file.clone()
    }

    pub fn status(&self) -> RunStatus {
        self.inner.lock().status
    }

    pub fn append_output_line(&self, line: &str) {
        {
            let mut inner = self.inner.lock();
            if inner.tail.len() == TAIL_CAPACITY {
                inner.tail.pop_front();
            }
            inner.tail.push_back(line.to_string());
        }
        self.persist(false);
    }

    pub fn mark_status(&self, status: RunStatus) {
        self.inner.lock().status = status;
        self.persist(true);
    }

    pub fn set_pid(&self, pid: Option<u32>) {
        self.inner.lock().pid = pid;
        self.persist(true);
    }

    /// Record the exit code. Only the first call has any effect.
    pub fn finalize(&self, return_code: i32) {
        {
            let mut inner = self.inner.lock();
            if inner.finished.is_some() {
                tracing::debug!(return_code, "run already finalized");
                return;
            }
            inner.return_code = Some(return_code);
            inner.status = RunStatus::from_exit_code(return_code);
            inner.finished = Some(Instant::now());
        }
        self.persist(true);
    }

    /// Returns `true` the first time cancellation is requested.
    pub fn request_cancel(&self) -> bool {
        let mut inner = self.inner.lock();
        let first = !inner.cancel_requested;
        inner.cancel_requested = true;
        first
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.lock().cancel_requested
    }

    /// `finalize` has run.
    pub fn is_done(&self) -> bool {
        self.inner.lock().finished.is_some()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().snapshot(&self.meta)
    }

    /// Persist to the configured state file, if any. Unforced calls are dropped while the
    /// previous write is younger than the persist interval.
    pub fn persist(&self, force: bool) {
        let Some(path) = self.state_file() else {
            return;
        };
        self.persist_to(&path, force);
    }

    pub fn persist_to(&self, path: &Path, force: bool) {
        let _guard = self.persist_lock.lock();
        let snapshot = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            if !force {
                if let Some(last) = inner.last_persist {
                    if now.duration_since(last) < inner.persist_interval {
                        return;
                    }
                }
            }
            inner.last_persist = Some(now);
            inner.snapshot(&self.meta)
        };
        if let Err(e) = write_snapshot(path, &snapshot) {
            tracing::debug!(path = %path.display(), "snapshot write failed: {e:#}");
        }
    }
}

impl TelemetrySink for &RunState {
    fn begin_record(&mut self, step: Option<i64>) {
        self.inner.lock().open = Some(OpenRecord::new(step));
    }

    fn set_record_fields(&mut self, fields: Fields) {
        self.inner
            .lock()
            .open
            .get_or_insert_with(OpenRecord::default)
            .fields
            .merge(&fields);
    }

    fn finalize_record(&mut self) -> Option<TelemetryRecord> {
        let record = {
            let mut inner = self.inner.lock();
            let record = inner.open.take()?.finalize()?;
            inner.series.push(&record);
            inner.records.push(record.clone());
            record
        };
        tracing::trace!(step = record.step, "md step recorded");
        self.persist(false);
        Some(record)
    }

    fn amend_latest_record(&mut self, fields: Fields) {
        {
            let mut inner = self.inner.lock();
            let Some(last) = inner.records.last_mut() else {
                return;
            };
            last.amend(&fields);
            inner.series.amend_last(&fields);
        }
        self.persist(false);
    }
}

/// Write `snapshot` as JSON next to `path` and rename it into place, so readers only ever
/// see a complete document.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create state directory {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let data = serde_json::to_vec_pretty(snapshot).context("serialize snapshot")?;
    fs::write(&tmp, data).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename onto {}", path.display()))?;
    Ok(())
}

/// Read a snapshot file. `None` while the file is absent or not yet parseable.
pub fn load_snapshot(path: &Path) -> Option<Snapshot> {
    let data = fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}
