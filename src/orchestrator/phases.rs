//! Phase dispatch: one handler per `Phase`, and the outcome they hand back.
//!
//! Handlers only read the state. Everything they want changed travels back in a
//! `PhaseOutcome`, which the loop merges after the phase returns.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::context::Context;
use super::handlers;
use crate::errors::{PhaseError, TransitionError};
use crate::phase::Phase;
use crate::state::{
    Objective, ObjectiveId, ObjectiveStatus, PipelineState, PriorityTier, Task, TaskId,
    TaskStatus,
};

/// What the loop decided to run this iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub phase: Phase,
    pub task_id: Option<TaskId>,
    pub objective_id: Option<ObjectiveId>,
    /// The phase the loop detector replaced, if any.
    pub substituted_for: Option<Phase>,
}

/// A task proposed by the planner.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewTask {
    pub description: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub priority: Option<u32>,
}

/// An objective proposed by project planning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewObjective {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tier: Option<PriorityTier>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskChange {
    Status(TaskStatus),
    /// Move to `status` and keep `reason` in the task's error history.
    Rejected { status: TaskStatus, reason: String },
    /// Consumes an attempt; the task fails once none are left.
    AttemptFailed { error: String },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhaseOutcome {
    pub success: bool,
    pub message: String,
    pub task_change: Option<(TaskId, TaskChange)>,
    pub new_tasks: Vec<NewTask>,
    pub new_objectives: Vec<NewObjective>,
    /// Documentation for this objective has been written.
    pub documented: Option<ObjectiveId>,
}

impl PhaseOutcome {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_task_change(mut self, task: TaskId, change: TaskChange) -> Self {
        self.task_change = Some((task, change));
        self
    }

    /// Fold the outcome into `state`.
    pub fn apply(
        &self,
        ctx: &Context,
        state: &mut PipelineState,
        decision: &Decision,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let phase = decision.phase.as_str();
        if let Some((task_id, change)) = &self.task_change {
            let depth = ctx.error_history_depth();
            let task = state.task_mut(*task_id)?;
            match change {
                TaskChange::Status(status) => task.set_status(*status, now),
                TaskChange::Rejected { status, reason } => {
                    task.record_error(phase, reason.as_str(), depth, now);
                    task.set_status(*status, now);
                }
                TaskChange::AttemptFailed { error } => {
                    record_attempt_failure(task, phase, error, ctx.max_task_attempts(), depth, now);
                }
            }
        }

        for new in &self.new_tasks {
            let priority = ctx
                .bands()
                .assign(&new.description, &new.target, new.priority);
            let mut task = Task::new(TaskId(0), &new.description, &new.target, priority, now);
            if let Some(objective_id) = decision.objective_id {
                task = task.with_objective(objective_id);
            }
            let id = state.add_task(task)?;
            tracing::info!(task = %id, priority, description = %new.description, "Task created");
        }

        for new in &self.new_objectives {
            let objective = Objective::new(ObjectiveId(0), &new.title, now)
                .with_description(&new.description)
                .with_tier(new.tier.unwrap_or_default())
                .with_status(ObjectiveStatus::Approved);
            let id = state.add_objective(objective);
            tracing::info!(objective = %id, title = %new.title, "Objective created");
        }

        if let Some(objective_id) = self.documented {
            let open = state
                .tasks_in(Some(objective_id))
                .iter()
                .any(|t| t.status.is_open());
            let objective = state.objective_mut(objective_id)?;
            objective.documented = true;
            if !open {
                objective.transition(ObjectiveStatus::Completed, now)?;
                tracing::info!(objective = %objective_id, "Objective completed");
            }
        }

        state.rebuild_queue();
        Ok(())
    }
}

/// Count a failed attempt against `task`.
pub fn record_attempt_failure(
    task: &mut Task,
    phase: &str,
    error: &str,
    max_attempts: u32,
    depth: usize,
    now: DateTime<Utc>,
) {
    task.attempts += 1;
    task.record_error(phase, error, depth, now);
    if !task.can_retry(max_attempts) {
        tracing::warn!(task = %task.id, attempts = task.attempts, "Task failed; attempts exhausted");
        task.set_status(TaskStatus::Failed, now);
    }
}

#[async_trait]
pub trait PhaseHandler: Send + Sync {
    async fn execute(
        &self,
        ctx: &Context,
        state: &PipelineState,
        decision: &Decision,
    ) -> Result<PhaseOutcome, PhaseError>;
}

/// Dispatch table from phase to handler.
pub struct PhaseTable {
    handlers: HashMap<Phase, Box<dyn PhaseHandler>>,
}

impl PhaseTable {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The built-in handler for every phase.
    pub fn standard() -> Self {
        Self::empty()
            .with_handler(Phase::Planning, handlers::Planning)
            .with_handler(Phase::Coding, handlers::Coding)
            .with_handler(Phase::Qa, handlers::Qa)
            .with_handler(Phase::Debugging, handlers::Debugging)
            .with_handler(Phase::Documentation, handlers::Documentation)
            .with_handler(Phase::ProjectPlanning, handlers::ProjectPlanning)
            .with_handler(Phase::Complete, handlers::Complete)
    }

    pub fn with_handler(mut self, phase: Phase, handler: impl PhaseHandler + 'static) -> Self {
        self.handlers.insert(phase, Box::new(handler));
        self
    }

    pub fn covers(&self, phase: Phase) -> bool {
        self.handlers.contains_key(&phase)
    }

    pub async fn execute(
        &self,
        ctx: &Context,
        state: &PipelineState,
        decision: &Decision,
    ) -> Result<PhaseOutcome, PhaseError> {
        match self.handlers.get(&decision.phase) {
            Some(handler) => handler.execute(ctx, state, decision).await,
            None => Ok(PhaseOutcome::failed(format!(
                "No handler registered for phase {}",
                decision.phase
            ))),
        }
    }
}

impl Default for PhaseTable {
    fn default() -> Self {
        Self::standard()
    }
}
