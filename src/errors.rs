//! Typed error hierarchy for the conductor control loop.
//!
//! Leaf enums belong to one subsystem each:
//! - `StateError`: persisted state document and its store
//! - `WorkerError`: a single worker invocation
//! - `PlanError`: orchestration plan construction
//! - `TransitionError`: objective/task lifecycle moves
//!
//! `PhaseError` normalizes everything a phase handler can hit, and `PipelineError`
//! is the taxonomy the execution loop acts on.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::loop_detect::LoopKind;
use crate::phase::Phase;
use crate::state::{ObjectiveId, ObjectiveStatus, TaskId};

/// Errors from loading or saving the pipeline state document.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("No state document at {path}")]
    Missing { path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State document at {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error(
        "State document at {path} has schema version {found:?}, expected {expected}"
    )]
    IncompatibleSchema {
        path: PathBuf,
        found: Option<u64>,
        expected: u32,
    },

    #[error("State at {path} is locked by another coordinator")]
    Locked { path: PathBuf },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Errors from a single worker invocation.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker {worker} timed out after {timeout:?} running role {role}")]
    Timeout {
        worker: String,
        role: String,
        timeout: Duration,
    },

    #[error("Worker {worker} invocation failed: {message}")]
    Invocation { worker: String, message: String },

    #[error("Worker {worker} returned undecodable output: {message}")]
    Decode { worker: String, message: String },

    #[error("No healthy worker available for role {role}")]
    NoWorkerAvailable { role: String },

    #[error("Worker {worker} rejected the request: {message}")]
    Rejected { worker: String, message: String },
}

impl WorkerError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, WorkerError::Rejected { .. })
    }
}

/// Errors from building an orchestration plan.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("Duplicate worker task id: {id}")]
    DuplicateTask { id: String },

    #[error("Unknown dependency '{dependency}' in worker task '{task}'")]
    UnknownDependency { task: String, dependency: String },

    #[error(
        "Worker task '{task}' in wave {wave} depends on '{dependency}' which is not in an earlier wave"
    )]
    ForwardReference {
        task: String,
        dependency: String,
        wave: usize,
    },

    #[error("Cycle detected in worker task dependencies. Involved tasks: {tasks:?}")]
    Cycle { tasks: Vec<String> },
}

/// Errors from objective and task lifecycle transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Objective {id} cannot move from {from} to {to}")]
    Backwards {
        id: ObjectiveId,
        from: ObjectiveStatus,
        to: ObjectiveStatus,
    },

    #[error("Objective {requested} cannot become active while {active} is active")]
    AnotherActive {
        requested: ObjectiveId,
        active: ObjectiveId,
    },

    #[error("Objective {0} not found")]
    UnknownObjective(ObjectiveId),

    #[error("Task {0} not found")]
    UnknownTask(TaskId),
}

/// Errors raised while executing one phase.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Worker task {task} failed after {attempts} attempts: {source}")]
    Worker {
        task: String,
        attempts: u32,
        #[source]
        source: WorkerError,
    },

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Could not decode {what} from worker result: {message}")]
    Decode { what: &'static str, message: String },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Loop-level error taxonomy.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Transient worker failure on {task} after {attempts} attempts: {source}")]
    TransientWorker {
        task: String,
        attempts: u32,
        #[source]
        source: WorkerError,
    },

    #[error("Structural state error: {0}")]
    StructuralState(#[from] StateError),

    #[error("No eligible objective and no tactical task available")]
    SchedulingDeadlock,

    #[error("Loop detected ({kind}) while choosing phase {phase}")]
    LoopDetected { kind: LoopKind, phase: Phase },

    #[error(
        "{consecutive} consecutive loop detections exceed the budget of {budget}; external intervention required"
    )]
    LoopBudgetExhausted { consecutive: u32, budget: u32 },

    #[error("Phase failed: {message}")]
    PhaseFailed { message: String },
}

impl PipelineError {
    /// Fatal errors stop the loop; everything else is recorded and the loop continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::StructuralState(_) | PipelineError::LoopBudgetExhausted { .. }
        )
    }
}

impl From<PhaseError> for PipelineError {
    fn from(err: PhaseError) -> Self {
        match err {
            PhaseError::Worker {
                task,
                attempts,
                source,
            } => PipelineError::TransientWorker {
                task,
                attempts,
                source,
            },
            PhaseError::State(e) => PipelineError::StructuralState(e),
            other => PipelineError::PhaseFailed {
                message: other.to_string(),
            },
        }
    }
}
