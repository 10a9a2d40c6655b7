//! Crash-safe persistence of the pipeline state document.
//!
//! Saves go through a temp file that is synced and renamed over `state.json`, so a
//! crash leaves either the previous document or the new one, never a torn write.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;
use uuid::Uuid;

use super::objective::ObjectiveStatus;
use super::pipeline::{PipelineState, SCHEMA_VERSION};
use super::task::TaskStatus;
use crate::errors::StateError;
use crate::phase::Phase;

pub const STATE_FILE: &str = "state.json";
const TMP_FILE: &str = "state.json.tmp";
const LOCK_FILE: &str = "state.lock";
const HISTORY_DIR: &str = "history";
const BACKUPS_DIR: &str = "backups";
const ESCALATIONS_DIR: &str = "escalations";

const SNAPSHOT_TS: &str = "%Y%m%dT%H%M%S%6fZ";

/// Breaks ties between snapshots taken within the same microsecond.
static SNAPSHOT_SEQ: AtomicU64 = AtomicU64::new(0);

/// `state-<timestamp>-<sequence>.json`; names sort in the order they were taken.
fn snapshot_name(now: DateTime<Utc>) -> String {
    let seq = SNAPSHOT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("state-{}-{:010}.json", now.format(SNAPSHOT_TS), seq)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StateError + '_ {
    move |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Exclusive advisory lock on `state.lock`; released on drop.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Headline numbers for `conductor status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSummary {
    pub run_id: Uuid,
    pub phase: Phase,
    pub iteration: u64,
    pub objectives_total: usize,
    pub objectives_completed: usize,
    pub active_objective: Option<String>,
    pub tasks_total: usize,
    pub tasks_open: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub completion_percentage: f64,
    pub last_phase: Option<(Phase, bool)>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    audit_depth: usize,
    backup_keep: usize,
}

impl StateStore {
    /// Store rooted at the `.conductor` directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            audit_depth: 20,
            backup_keep: 10,
        }
    }

    pub fn with_audit_depth(mut self, depth: usize) -> Self {
        self.audit_depth = depth;
        self
    }

    pub fn with_backup_keep(mut self, keep: usize) -> Self {
        self.backup_keep = keep;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn history_dir(&self) -> PathBuf {
        self.dir.join(HISTORY_DIR)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.dir.join(BACKUPS_DIR)
    }

    pub fn escalations_dir(&self) -> PathBuf {
        self.dir.join(ESCALATIONS_DIR)
    }

    pub fn exists(&self) -> bool {
        self.state_path().exists()
    }

    /// Load the document. Never falls back to a default.
    pub fn load(&self) -> Result<PipelineState, StateError> {
        let path = self.state_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StateError::Missing { path });
            }
            Err(source) => return Err(StateError::Io { path, source }),
        };
        parse_state(&path, &content)
    }

    /// Atomically replace the document, then append it to the audit trail.
    pub fn save(&self, state: &PipelineState) -> Result<(), StateError> {
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let json = serde_json::to_string_pretty(state).map_err(StateError::Serialize)?;

        let tmp = self.dir.join(TMP_FILE);
        {
            let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
            file.write_all(json.as_bytes()).map_err(io_err(&tmp))?;
            file.sync_all().map_err(io_err(&tmp))?;
        }
        let path = self.state_path();
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        // Not every platform can sync a directory handle.
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        self.append_history(&json)?;
        tracing::debug!(iteration = state.iteration, phase = %state.phase, "State saved");
        Ok(())
    }

    /// Create and persist a fresh document.
    pub fn initialize(&self, now: DateTime<Utc>) -> Result<PipelineState, StateError> {
        let state = PipelineState::new(now);
        self.save(&state)?;
        Ok(state)
    }

    fn append_history(&self, json: &str) -> Result<(), StateError> {
        if self.audit_depth == 0 {
            return Ok(());
        }
        let dir = self.history_dir();
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let path = dir.join(snapshot_name(Utc::now()));
        fs::write(&path, json).map_err(io_err(&path))?;
        prune(&dir, self.audit_depth)
    }

    /// Snapshot files in the audit trail, oldest first.
    pub fn history_snapshots(&self) -> Vec<PathBuf> {
        snapshots(&self.history_dir())
    }

    /// Copy the current document into `backups/`. Returns `None` when there is
    /// nothing to back up.
    pub fn backup(&self) -> Result<Option<PathBuf>, StateError> {
        let source = self.state_path();
        if !source.exists() {
            return Ok(None);
        }
        let dir = self.backups_dir();
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let target = dir.join(snapshot_name(Utc::now()));
        fs::copy(&source, &target).map_err(io_err(&target))?;
        prune(&dir, self.backup_keep.max(1))?;
        tracing::info!(backup = %target.display(), "State backed up");
        Ok(Some(target))
    }

    pub fn list_backups(&self) -> Vec<PathBuf> {
        snapshots(&self.backups_dir())
    }

    /// Take the single-coordinator lock.
    pub fn lock(&self) -> Result<StateLock, StateError> {
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_err(&path))?;
        file.try_lock_exclusive()
            .map_err(|_| StateError::Locked { path: path.clone() })?;
        Ok(StateLock { file, path })
    }

    /// Persist an escalation report for a human to look at.
    pub fn write_escalation<T: Serialize>(
        &self,
        label: &str,
        report: &T,
    ) -> Result<PathBuf, StateError> {
        let dir = self.escalations_dir();
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let path = dir.join(format!(
            "escalation-{}-{}.json",
            Utc::now().format(SNAPSHOT_TS),
            label
        ));
        let json = serde_json::to_string_pretty(report).map_err(StateError::Serialize)?;
        fs::write(&path, json).map_err(io_err(&path))?;
        Ok(path)
    }

    pub fn summary(state: &PipelineState) -> StateSummary {
        let count = |status: TaskStatus| state.tasks.values().filter(|t| t.status == status).count();
        StateSummary {
            run_id: state.run_id,
            phase: state.phase,
            iteration: state.iteration,
            objectives_total: state.objectives.len(),
            objectives_completed: state
                .objectives
                .values()
                .filter(|o| o.status == ObjectiveStatus::Completed)
                .count(),
            active_objective: state
                .active_objective()
                .and_then(|id| state.objectives.get(&id))
                .map(|o| format!("{} {}", o.id, o.title)),
            tasks_total: state.tasks.len(),
            tasks_open: state.task_queue.len(),
            tasks_completed: count(TaskStatus::Completed),
            tasks_failed: count(TaskStatus::Failed),
            completion_percentage: state.completion_percentage(),
            last_phase: state.phase_history.last().map(|r| (r.phase, r.success)),
            updated_at: state.updated_at,
        }
    }
}

/// Validate the schema version before decoding the full document.
fn parse_state(path: &Path, content: &str) -> Result<PipelineState, StateError> {
    let corrupt = |e: serde_json::Error| StateError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let value: serde_json::Value = serde_json::from_str(content).map_err(corrupt)?;
    let found = value.get("schema_version").and_then(|v| v.as_u64());
    if found != Some(u64::from(SCHEMA_VERSION)) {
        return Err(StateError::IncompatibleSchema {
            path: path.to_path_buf(),
            found,
            expected: SCHEMA_VERSION,
        });
    }
    serde_json::from_value(value).map_err(corrupt)
}

fn snapshots(dir: &Path) -> Vec<PathBuf> {
    let pattern = dir.join("state-*.json");
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .map(|paths| paths.filter_map(Result::ok).collect())
        .unwrap_or_default();
    files.sort();
    files
}

fn prune(dir: &Path, keep: usize) -> Result<(), StateError> {
    let files = snapshots(dir);
    let excess = files.len().saturating_sub(keep);
    for old in &files[..excess] {
        fs::remove_file(old).map_err(io_err(old))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Objective, ObjectiveId, Task, TaskId};
    use tempfile::tempdir;

    fn populated() -> PipelineState {
        let now = Utc::now();
        let mut state = PipelineState::new(now);
        let oid = state.add_objective(
            Objective::new(ObjectiveId(0), "Storage", now)
                .with_description("Persist session cache")
                .with_status(ObjectiveStatus::Approved),
        );
        state
            .add_task(Task::new(TaskId(0), "Write store", "src/store.rs", 50, now).with_objective(oid))
            .unwrap();
        state.update_all_progress(now);
        state.iteration = 7;
        state
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = populated();

        store.save(&state).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, state);
        assert!(!dir.path().join(TMP_FILE).exists());
    }

    #[test]
    fn test_load_missing_is_explicit() {
        let dir = tempdir().unwrap();
        let err = StateStore::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, StateError::Missing { .. }));
    }

    #[test]
    fn test_load_corrupt_document() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(STATE_FILE), "{not json").unwrap();
        let err = StateStore::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn test_load_rejects_other_schema_versions() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());

        fs::write(store.state_path(), r#"{"schema_version": 2, "iteration": 1}"#).unwrap();
        match store.load().unwrap_err() {
            StateError::IncompatibleSchema { found, expected, .. } => {
                assert_eq!(found, Some(2));
                assert_eq!(expected, SCHEMA_VERSION);
            }
            other => panic!("unexpected error: {other}"),
        }

        fs::write(store.state_path(), r#"{"iteration": 1}"#).unwrap();
        assert!(matches!(
            store.load().unwrap_err(),
            StateError::IncompatibleSchema { found: None, .. }
        ));
    }

    #[test]
    fn test_audit_trail_is_bounded() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path()).with_audit_depth(3);
        let mut state = populated();
        for i in 0..6 {
            state.iteration = i;
            store.save(&state).unwrap();
        }
        let snapshots = store.history_snapshots();
        assert_eq!(snapshots.len(), 3);
        let newest: PipelineState =
            serde_json::from_str(&fs::read_to_string(snapshots.last().unwrap()).unwrap()).unwrap();
        assert_eq!(newest.iteration, 5);
    }

    #[test]
    fn test_snapshot_names_are_unique_within_one_instant() {
        let now = Utc::now();
        let first = snapshot_name(now);
        let second = snapshot_name(now);
        assert_ne!(first, second);
        assert!(first < second);
        assert!(first.starts_with("state-") && first.ends_with(".json"));
    }

    #[test]
    fn test_rapid_saves_each_leave_a_snapshot() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path()).with_audit_depth(50);
        let mut state = populated();
        for i in 0..20 {
            state.iteration = i;
            store.save(&state).unwrap();
        }
        let snapshots = store.history_snapshots();
        assert_eq!(snapshots.len(), 20);
        let iterations: Vec<u64> = snapshots
            .iter()
            .map(|p| {
                let saved: PipelineState =
                    serde_json::from_str(&fs::read_to_string(p).unwrap()).unwrap();
                saved.iteration
            })
            .collect();
        assert_eq!(iterations, (0..20).collect::<Vec<u64>>());
    }

    #[test]
    fn test_backup_keeps_configured_count() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path()).with_backup_keep(2);
        assert!(store.backup().unwrap().is_none());

        store.save(&populated()).unwrap();
        for _ in 0..4 {
            store.backup().unwrap().unwrap();
        }
        assert_eq!(store.list_backups().len(), 2);
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let held = store.lock().unwrap();
        assert!(matches!(store.lock().unwrap_err(), StateError::Locked { .. }));
        drop(held);
        store.lock().unwrap();
    }

    #[test]
    fn test_summary_counts() {
        let state = populated();
        let summary = StateStore::summary(&state);
        assert_eq!(summary.objectives_total, 1);
        assert_eq!(summary.tasks_total, 1);
        assert_eq!(summary.tasks_open, 1);
        assert_eq!(summary.iteration, 7);
        assert!(summary.active_objective.is_none());
    }

    #[test]
    fn test_write_escalation() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let path = store
            .write_escalation("loop", &serde_json::json!({"kind": "state_cycle"}))
            .unwrap();
        assert!(path.starts_with(store.escalations_dir()));
        assert!(fs::read_to_string(path).unwrap().contains("state_cycle"));
    }
}
