//! Concrete, schedulable units of work.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::arena::ArenaItem;
use super::objective::ObjectiveId;

/// Arena key for tasks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub u32);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    QaPending,
    NeedsFix,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Open tasks still need work from some phase.
    pub fn is_open(&self) -> bool {
        !matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Urgency rank used to pick the focus task: lower is picked first.
    pub fn urgency(&self) -> u8 {
        match self {
            TaskStatus::NeedsFix => 0,
            TaskStatus::QaPending => 1,
            TaskStatus::InProgress => 2,
            TaskStatus::Pending => 2,
            TaskStatus::Failed => 3,
            TaskStatus::Completed => 4,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::QaPending => "qa_pending",
            TaskStatus::NeedsFix => "needs_fix",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One recorded failure on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskErrorEntry {
    pub phase: String,
    pub message: String,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective_id: Option<ObjectiveId>,
    pub description: String,
    /// Artifact this task produces or edits (usually a file path).
    #[serde(default)]
    pub target: String,
    /// Lower is more urgent.
    pub priority: u32,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub errors: VecDeque<TaskErrorEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArenaItem for Task {
    type Id = TaskId;

    fn arena_id(&self) -> TaskId {
        self.id
    }
}

impl Task {
    pub fn new(
        id: TaskId,
        description: impl Into<String>,
        target: impl Into<String>,
        priority: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            objective_id: None,
            description: description.into(),
            target: target.into(),
            priority,
            status: TaskStatus::Pending,
            attempts: 0,
            errors: VecDeque::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_objective(mut self, objective_id: ObjectiveId) -> Self {
        self.objective_id = Some(objective_id);
        self
    }

    pub fn set_status(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    /// Record a failed attempt, keeping at most `depth` errors.
    pub fn record_error(
        &mut self,
        phase: &str,
        message: impl Into<String>,
        depth: usize,
        now: DateTime<Utc>,
    ) {
        self.errors.push_back(TaskErrorEntry {
            phase: phase.to_string(),
            message: message.into(),
            attempt: self.attempts,
            timestamp: now,
        });
        while self.errors.len() > depth {
            self.errors.pop_front();
        }
        self.updated_at = now;
    }

    /// The most recent errors, newest last, for inclusion in worker payloads.
    pub fn error_context(&self, max: usize) -> Vec<&TaskErrorEntry> {
        let skip = self.errors.len().saturating_sub(max);
        self.errors.iter().skip(skip).collect()
    }

    /// Whether a failed task may still be retried.
    pub fn can_retry(&self, max_attempts: u32) -> bool {
        self.attempts < max_attempts
    }
}
