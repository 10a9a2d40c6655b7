//! The canonical pipeline document and the bookkeeping that keeps it consistent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::history::{PhaseHistory, PhaseRecord};
use super::objective::{Objective, ObjectiveId, ObjectiveStatus};
use super::task::{Task, TaskId, TaskStatus};
use crate::errors::TransitionError;
use crate::phase::{ObjectivePresence, Phase};

/// Version of the on-disk layout. Loading any other value fails fast.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub schema_version: u32,
    pub run_id: Uuid,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub iteration: u64,
    #[serde(default, with = "super::arena")]
    pub objectives: BTreeMap<ObjectiveId, Objective>,
    #[serde(default, with = "super::arena")]
    pub tasks: BTreeMap<TaskId, Task>,
    /// Open task ids ordered by (priority, id).
    #[serde(default)]
    pub task_queue: Vec<TaskId>,
    #[serde(default)]
    pub phase_history: PhaseHistory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: Uuid::new_v4(),
            phase: Phase::Planning,
            iteration: 0,
            objectives: BTreeMap::new(),
            tasks: BTreeMap::new(),
            task_queue: Vec::new(),
            phase_history: PhaseHistory::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn next_objective_id(&self) -> ObjectiveId {
        ObjectiveId(self.objectives.keys().next_back().map_or(1, |id| id.0 + 1))
    }

    fn next_task_id(&self) -> TaskId {
        TaskId(self.tasks.keys().next_back().map_or(1, |id| id.0 + 1))
    }

    /// Insert an objective under a freshly allocated id.
    pub fn add_objective(&mut self, mut objective: Objective) -> ObjectiveId {
        let id = self.next_objective_id();
        objective.id = id;
        self.objectives.insert(id, objective);
        id
    }

    /// Insert a task under a freshly allocated id, linking it to its objective.
    pub fn add_task(&mut self, mut task: Task) -> Result<TaskId, TransitionError> {
        let id = self.next_task_id();
        task.id = id;
        if let Some(objective_id) = task.objective_id {
            let objective = self
                .objectives
                .get_mut(&objective_id)
                .ok_or(TransitionError::UnknownObjective(objective_id))?;
            objective.tasks.push(id);
        }
        self.tasks.insert(id, task);
        self.rebuild_queue();
        Ok(id)
    }

    pub fn objective(&self, id: ObjectiveId) -> Result<&Objective, TransitionError> {
        self.objectives
            .get(&id)
            .ok_or(TransitionError::UnknownObjective(id))
    }

    pub fn objective_mut(&mut self, id: ObjectiveId) -> Result<&mut Objective, TransitionError> {
        self.objectives
            .get_mut(&id)
            .ok_or(TransitionError::UnknownObjective(id))
    }

    pub fn task(&self, id: TaskId) -> Result<&Task, TransitionError> {
        self.tasks.get(&id).ok_or(TransitionError::UnknownTask(id))
    }

    pub fn task_mut(&mut self, id: TaskId) -> Result<&mut Task, TransitionError> {
        self.tasks.get_mut(&id).ok_or(TransitionError::UnknownTask(id))
    }

    pub fn active_objective(&self) -> Option<ObjectiveId> {
        self.objectives
            .values()
            .find(|o| o.status == ObjectiveStatus::Active)
            .map(|o| o.id)
    }

    /// Make `id` the single active objective.
    pub fn activate_objective(
        &mut self,
        id: ObjectiveId,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        match self.active_objective() {
            Some(active) if active != id => {
                return Err(TransitionError::AnotherActive {
                    requested: id,
                    active,
                });
            }
            _ => {}
        }
        self.objective_mut(id)?
            .transition(ObjectiveStatus::Active, now)
    }

    /// A dependency is met only when it exists and is completed.
    pub fn unmet_dependencies(&self, objective: &Objective) -> Vec<ObjectiveId> {
        objective
            .depends_on
            .iter()
            .filter(|dep| {
                self.objectives
                    .get(dep)
                    .is_none_or(|o| o.status != ObjectiveStatus::Completed)
            })
            .copied()
            .collect()
    }

    pub fn dependencies_met(&self, objective: &Objective) -> bool {
        self.unmet_dependencies(objective).is_empty()
    }

    pub fn rebuild_queue(&mut self) {
        let mut open: Vec<&Task> = self.tasks.values().filter(|t| t.status.is_open()).collect();
        open.sort_by_key(|t| (t.priority, t.id));
        self.task_queue = open.into_iter().map(|t| t.id).collect();
    }

    /// Tasks belonging to `scope`, or every task when unscoped.
    pub fn tasks_in(&self, scope: Option<ObjectiveId>) -> Vec<&Task> {
        match scope {
            Some(objective_id) => self
                .tasks
                .values()
                .filter(|t| t.objective_id == Some(objective_id))
                .collect(),
            None => self.tasks.values().collect(),
        }
    }

    /// The most urgent actionable task: needs_fix, then qa_pending, then
    /// pending/in_progress, then failed tasks that still have attempts left. Ties
    /// inside a group go by (priority, id).
    pub fn focus_task(&self, scope: Option<ObjectiveId>, max_attempts: u32) -> Option<&Task> {
        self.tasks_in(scope)
            .into_iter()
            .filter(|t| {
                t.status.is_open() || (t.status == TaskStatus::Failed && t.can_retry(max_attempts))
            })
            .min_by_key(|t| (t.status.urgency(), t.priority, t.id))
    }

    /// Focus input for the phase table. `None` means there are no tasks at all;
    /// `Some(Completed)` means nothing actionable is left.
    pub fn focus_status(&self, scope: Option<ObjectiveId>, max_attempts: u32) -> Option<TaskStatus> {
        if self.tasks_in(scope).is_empty() {
            return None;
        }
        Some(
            self.focus_task(scope, max_attempts)
                .map_or(TaskStatus::Completed, |t| t.status),
        )
    }

    pub fn has_actionable_tasks(&self, max_attempts: u32) -> bool {
        self.focus_task(None, max_attempts).is_some()
    }

    pub fn objective_presence(&self) -> ObjectivePresence {
        if self.objectives.is_empty() {
            ObjectivePresence::Absent
        } else if self
            .objectives
            .values()
            .all(|o| o.status == ObjectiveStatus::Completed)
        {
            ObjectivePresence::Complete
        } else {
            ObjectivePresence::Incomplete
        }
    }

    pub fn incomplete_objectives(&self) -> usize {
        self.objectives
            .values()
            .filter(|o| o.status != ObjectiveStatus::Completed)
            .count()
    }

    /// Recompute progress and scores for one objective from its tasks.
    pub fn update_objective_progress(
        &mut self,
        id: ObjectiveId,
        as_of: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let task_ids = self.objective(id)?.tasks.clone();
        let tasks: Vec<Task> = task_ids
            .iter()
            .filter_map(|tid| self.tasks.get(tid).cloned())
            .collect();
        let refs: Vec<&Task> = tasks.iter().collect();
        let gated = !self.dependencies_met(self.objective(id)?);

        let objective = self.objective_mut(id)?;
        objective.update_progress(&refs, as_of);
        if gated {
            objective.readiness_score = 0.0;
        }
        Ok(())
    }

    pub fn update_all_progress(&mut self, as_of: DateTime<Utc>) {
        let ids: Vec<ObjectiveId> = self.objectives.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.update_objective_progress(id, as_of) {
                tracing::warn!(objective = %id, error = %e, "Skipping progress update");
            }
        }
    }

    pub fn record_phase(&mut self, record: PhaseRecord, capacity: usize) {
        self.phase = record.phase;
        self.updated_at = record.timestamp;
        self.phase_history.push(record, capacity);
    }

    /// Percentage of tasks completed across the whole run.
    pub fn completion_percentage(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        let done = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        done as f64 / self.tasks.len() as f64 * 100.0
    }

    /// Clear per-objective failure streaks so a resumed run retries from scratch.
    pub fn reset_failure_streaks(&mut self) {
        for objective in self.objectives.values_mut() {
            objective.consecutive_failures = 0;
        }
    }
}
