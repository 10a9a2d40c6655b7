//! File-based inbox for operator signals.
//!
//! Each signal is one JSON file in `.conductor/signals/`. The loop drains the
//! inbox at the top of every iteration in file-name order, applies what it read,
//! and acknowledges (deletes) the files only after the state holding their effect
//! is saved. Files that do not decode are renamed to `*.rejected` and left for a
//! human. Unreadable entries are skipped and retried on the next drain.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{StateError, TransitionError};
use crate::state::{
    ObjectiveId, ObjectiveStatus, PipelineState, PriorityBands, PriorityTier, Task, TaskId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// Promote to the primary tier with a deadline of now.
    UrgentObjective { objective_id: ObjectiveId },
    BlockObjective {
        objective_id: ObjectiveId,
        #[serde(default)]
        reason: String,
    },
    UnblockObjective { objective_id: ObjectiveId },
    AddTask {
        description: String,
        #[serde(default)]
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        objective_id: Option<ObjectiveId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<u32>,
    },
}

impl Signal {
    /// Apply to `state`, returning a one-line description of what changed.
    pub fn apply(
        &self,
        state: &mut PipelineState,
        bands: &PriorityBands,
        now: DateTime<Utc>,
    ) -> Result<String, TransitionError> {
        match self {
            Signal::UrgentObjective { objective_id } => {
                let objective = state.objective_mut(*objective_id)?;
                objective.tier = PriorityTier::Primary;
                objective.target_date = Some(now);
                if objective.status == ObjectiveStatus::Proposed {
                    objective.transition(ObjectiveStatus::Approved, now)?;
                }
                Ok(format!("{} marked urgent", objective_id))
            }
            Signal::BlockObjective {
                objective_id,
                reason,
            } => {
                state
                    .objective_mut(*objective_id)?
                    .transition(ObjectiveStatus::Blocked, now)?;
                Ok(format!("{} blocked: {}", objective_id, reason))
            }
            Signal::UnblockObjective { objective_id } => {
                state
                    .objective_mut(*objective_id)?
                    .transition(ObjectiveStatus::Approved, now)?;
                Ok(format!("{} unblocked", objective_id))
            }
            Signal::AddTask {
                description,
                target,
                objective_id,
                priority,
            } => {
                let priority = bands.assign(description, target, *priority);
                let mut task = Task::new(TaskId(0), description, target, priority, now);
                if let Some(objective_id) = objective_id {
                    task = task.with_objective(*objective_id);
                }
                let id = state.add_task(task)?;
                Ok(format!("added task {} (priority {})", id, priority))
            }
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StateError + '_ {
    move |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone)]
pub struct SignalInbox {
    dir: PathBuf,
}

impl SignalInbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Queue a signal. The file appears under its final name only once complete.
    pub fn send(&self, signal: &Signal) -> Result<PathBuf, StateError> {
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let id = Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.6f"),
            &id[..8]
        );
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!("{}.tmp", name));
        let json = serde_json::to_string_pretty(signal).map_err(StateError::Serialize)?;
        fs::write(&tmp, json).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        Ok(path)
    }

    pub fn pending(&self) -> Vec<PathBuf> {
        let pattern = self.dir.join("*.json");
        let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .map(|paths| paths.filter_map(Result::ok).collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    /// Read every pending signal, oldest first. Nothing is removed; pass the
    /// paths to [`SignalInbox::acknowledge`] once their effect is durable.
    pub fn drain(&self) -> Vec<PendingSignal> {
        let mut signals = Vec::new();
        for path in self.pending() {
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable signal");
                    continue;
                }
            };
            match serde_json::from_str::<Signal>(&content) {
                Ok(signal) => signals.push(PendingSignal { path, signal }),
                Err(e) => {
                    let rejected = path.with_extension("rejected");
                    tracing::warn!(file = %path.display(), error = %e, "Rejecting undecodable signal");
                    if let Err(e) = fs::rename(&path, &rejected) {
                        tracing::warn!(file = %path.display(), error = %e, "Could not set signal aside");
                    }
                }
            }
        }
        signals
    }

    /// Apply every pending signal to `state`. A signal that does not apply is
    /// logged and still counted as consumed. Returns the files to acknowledge.
    pub fn apply_pending(
        &self,
        state: &mut PipelineState,
        bands: &PriorityBands,
        now: DateTime<Utc>,
    ) -> Vec<PathBuf> {
        let mut consumed = Vec::new();
        for PendingSignal { path, signal } in self.drain() {
            match signal.apply(state, bands, now) {
                Ok(summary) => tracing::info!(signal = %summary, "Applied signal"),
                Err(e) => tracing::warn!(?signal, error = %e, "Signal could not be applied"),
            }
            consumed.push(path);
        }
        consumed
    }

    /// Remove consumed signal files. A file that is already gone is fine.
    pub fn acknowledge(&self, files: &[PathBuf]) -> Result<(), StateError> {
        for path in files {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(path)(e)),
            }
        }
        Ok(())
    }
}

/// A decoded signal and the file it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSignal {
    pub path: PathBuf,
    pub signal: Signal,
}
