//! The built-in phase handlers.
//!
//! Every handler turns the decision into an orchestration plan, runs it, and reads
//! the workers' JSON results. Worker roles:
//!
//! | phase            | plan                                            | synthesis             |
//! |------------------|-------------------------------------------------|-----------------------|
//! | planning         | planner                                         | single result         |
//! | coding           | coder                                           | single result         |
//! | qa               | reviewer × `waves.reviewers`                    | consensus on verdict  |
//! | debugging        | analyst × `waves.analysts`, then fixer          | first success (fixer) |
//! | documentation    | writer                                          | single result         |
//! | project_planning | planner                                         | single result         |

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::context::Context;
use super::phases::{Decision, NewObjective, NewTask, PhaseHandler, PhaseOutcome, TaskChange};
use crate::errors::PhaseError;
use crate::state::{Objective, PipelineState, Task, TaskKind, TaskStatus};
use crate::waves::{
    PlanBuilder, PlanReport, Problem, Strategy, SubTaskSpec, Synthesis, WorkerTask, create_plan,
    synthesize, synthesize_field,
};

const PLANNER: &str = "planner";
const CODER: &str = "coder";
const REVIEWER: &str = "reviewer";
const ANALYST: &str = "analyst";
const FIXER: &str = "fixer";
const WRITER: &str = "writer";

/// Errors included in a task payload.
const ERROR_CONTEXT: usize = 3;

fn task_json(task: &Task) -> Value {
    json!({
        "id": task.id,
        "description": task.description,
        "target": task.target,
        "priority": task.priority,
        "status": task.status,
        "attempts": task.attempts,
        "errors": task.error_context(ERROR_CONTEXT),
    })
}

fn objective_json(objective: &Objective) -> Value {
    json!({
        "id": objective.id,
        "title": objective.title,
        "description": objective.description,
        "tier": objective.tier,
        "acceptance_criteria": objective.acceptance_criteria,
    })
}

fn decode<T: DeserializeOwned>(what: &'static str, value: Value) -> Result<T, PhaseError> {
    serde_json::from_value(value).map_err(|e| PhaseError::Decode {
        what,
        message: e.to_string(),
    })
}

/// Classify the failures in a finished plan. Transient failures become an error
/// for the loop; a rejection comes back as its reason.
fn settle(report: &mut PlanReport) -> Result<Option<String>, PhaseError> {
    match report.first_failure() {
        Some((task, error)) if error.is_transient() => Err(PhaseError::Worker {
            task: task.id,
            attempts: task.attempts,
            source: error,
        }),
        Some((_, error)) => Ok(Some(error.to_string())),
        None => Ok(None),
    }
}

enum Reply {
    Accepted(Value),
    Rejected(String),
}

/// Run a single-worker plan.
async fn dispatch(ctx: &Context, title: &str, role: &str, payload: Value) -> Result<Reply, PhaseError> {
    let problem = Problem::new(title).task(SubTaskSpec::new(role, role, payload));
    let plan = create_plan(&problem, &Value::Null)?;
    let mut report = ctx.executor().execute_plan(plan).await;
    if let Some(task) = report.successes().next() {
        return Ok(Reply::Accepted(task.result.clone().unwrap_or(Value::Null)));
    }
    let reason = settle(&mut report)?.unwrap_or_else(|| format!("{} produced no result", role));
    Ok(Reply::Rejected(reason))
}

fn focus<'a>(state: &'a PipelineState, decision: &Decision) -> Option<&'a Task> {
    decision.task_id.and_then(|id| state.tasks.get(&id))
}

#[derive(Deserialize)]
struct TaskPlan {
    tasks: Vec<NewTask>,
}

#[derive(Deserialize)]
struct Roadmap {
    objectives: Vec<NewObjective>,
}

/// Break the focus objective (or the project) into tasks.
pub struct Planning;

#[async_trait]
impl PhaseHandler for Planning {
    async fn execute(
        &self,
        ctx: &Context,
        state: &PipelineState,
        decision: &Decision,
    ) -> Result<PhaseOutcome, PhaseError> {
        let objective = decision
            .objective_id
            .and_then(|id| state.objectives.get(&id));
        let existing: Vec<Value> = state.tasks_in(decision.objective_id).into_iter().map(task_json).collect();
        let payload = json!({
            "phase": "planning",
            "objective": objective.map(objective_json),
            "existing_tasks": existing,
        });

        match dispatch(ctx, "planning", PLANNER, payload).await? {
            Reply::Accepted(result) => {
                let plan: TaskPlan = decode("task plan", result)?;
                if plan.tasks.is_empty() {
                    return Ok(PhaseOutcome::failed("Planner proposed no tasks"));
                }
                Ok(PhaseOutcome {
                    message: format!("Planned {} tasks", plan.tasks.len()),
                    new_tasks: plan.tasks,
                    ..PhaseOutcome::succeeded("")
                })
            }
            Reply::Rejected(reason) => Ok(PhaseOutcome::failed(reason)),
        }
    }
}

pub struct Coding;

#[async_trait]
impl PhaseHandler for Coding {
    async fn execute(
        &self,
        ctx: &Context,
        state: &PipelineState,
        decision: &Decision,
    ) -> Result<PhaseOutcome, PhaseError> {
        let Some(task) = focus(state, decision) else {
            return Ok(PhaseOutcome::failed("No task to code"));
        };
        let payload = json!({ "phase": "coding", "task": task_json(task) });
        match dispatch(ctx, "coding", CODER, payload).await? {
            Reply::Accepted(_) => Ok(PhaseOutcome::succeeded(format!("Coded {}", task.id))
                .with_task_change(task.id, TaskChange::Status(TaskStatus::QaPending))),
            Reply::Rejected(reason) => Ok(PhaseOutcome::failed(reason.clone())
                .with_task_change(task.id, TaskChange::AttemptFailed { error: reason })),
        }
    }
}

/// Independent reviewers vote on `verdict`; a failing verdict carries their notes.
pub struct Qa;

fn reviewer_notes(tasks: &[WorkerTask], verdict: &str) -> String {
    let notes: Vec<&str> = tasks
        .iter()
        .filter_map(|t| t.result.as_ref())
        .filter(|r| r.get("verdict").and_then(Value::as_str) == Some(verdict))
        .filter_map(|r| r.get("notes").and_then(Value::as_str))
        .collect();
    if notes.is_empty() {
        "Review failed".to_string()
    } else {
        notes.join("; ")
    }
}

#[async_trait]
impl PhaseHandler for Qa {
    async fn execute(
        &self,
        ctx: &Context,
        state: &PipelineState,
        decision: &Decision,
    ) -> Result<PhaseOutcome, PhaseError> {
        let Some(task) = focus(state, decision) else {
            return Ok(PhaseOutcome::failed("No task to review"));
        };
        let waves = &ctx.config.toml.waves;
        let problem = (1..=waves.reviewers.max(1)).fold(Problem::new("qa"), |problem, i| {
            problem.task(SubTaskSpec::new(format!("review-{}", i), REVIEWER, Value::Null))
        });
        let plan = create_plan(&problem, &json!({ "phase": "qa", "task": task_json(task) }))?;
        let mut report = ctx.executor().execute_plan(plan).await;

        let strategy = Strategy::Consensus {
            min_agreement: waves.consensus_min_agreement,
        };
        match synthesize_field(&report.tasks, "verdict", strategy) {
            Synthesis::Agreed { value, votes, total } => match value.as_str() {
                Some("pass") => Ok(PhaseOutcome::succeeded(format!(
                    "{} passed review ({}/{})",
                    task.id, votes, total
                ))
                .with_task_change(task.id, TaskChange::Status(TaskStatus::Completed))),
                Some("fail") => {
                    let reason = reviewer_notes(&report.tasks, "fail");
                    Ok(PhaseOutcome::succeeded(format!(
                        "{} failed review ({}/{})",
                        task.id, votes, total
                    ))
                    .with_task_change(
                        task.id,
                        TaskChange::Rejected {
                            status: TaskStatus::NeedsFix,
                            reason,
                        },
                    ))
                }
                _ => Err(PhaseError::Decode {
                    what: "review verdict",
                    message: format!("expected \"pass\" or \"fail\", got {}", value),
                }),
            },
            Synthesis::Disagreement { groups } => {
                tracing::warn!(task = %task.id, ?groups, "Reviewers disagree; task stays in QA");
                Ok(PhaseOutcome::failed(format!(
                    "Reviewers disagree on {} (groups {:?})",
                    task.id, groups
                )))
            }
            _ => {
                let reason = settle(&mut report)?.unwrap_or_else(|| "No review produced".to_string());
                Ok(PhaseOutcome::failed(reason))
            }
        }
    }
}

/// Analysts study the failure in parallel; a fixer acts once all of them are done.
pub struct Debugging;

#[async_trait]
impl PhaseHandler for Debugging {
    async fn execute(
        &self,
        ctx: &Context,
        state: &PipelineState,
        decision: &Decision,
    ) -> Result<PhaseOutcome, PhaseError> {
        let Some(task) = focus(state, decision) else {
            return Ok(PhaseOutcome::failed("No task to debug"));
        };
        let analysts: Vec<SubTaskSpec> = (1..=ctx.config.toml.waves.analysts.max(1))
            .map(|i| SubTaskSpec::new(format!("analyze-{}", i), ANALYST, json!({ "step": "analyze" })))
            .collect();
        let analyst_ids: Vec<String> = analysts.iter().map(|s| s.id.clone()).collect();
        let fixer = SubTaskSpec::new("fix", FIXER, json!({ "step": "fix" })).after(analyst_ids);
        let plan = PlanBuilder::new("debugging")
            .context(json!({ "phase": "debugging", "task": task_json(task) }))
            .wave(analysts)
            .wave(vec![fixer])
            .build()?;
        let mut report = ctx.executor().execute_plan(plan).await;

        let fixes: Vec<WorkerTask> = report
            .tasks
            .iter()
            .filter(|t| t.role == FIXER)
            .cloned()
            .collect();
        match synthesize(&fixes, Strategy::FirstSuccess) {
            Synthesis::First { task: fix, .. } => {
                Ok(PhaseOutcome::succeeded(format!("{} fixed by {}", task.id, fix))
                    .with_task_change(task.id, TaskChange::Status(TaskStatus::QaPending)))
            }
            _ => {
                let reason = settle(&mut report)?.unwrap_or_else(|| "Fix was not attempted".to_string());
                Ok(PhaseOutcome::failed(reason.clone())
                    .with_task_change(task.id, TaskChange::AttemptFailed { error: reason }))
            }
        }
    }
}

/// Completes a documentation task, or documents the focus objective as a whole.
pub struct Documentation;

#[async_trait]
impl PhaseHandler for Documentation {
    async fn execute(
        &self,
        ctx: &Context,
        state: &PipelineState,
        decision: &Decision,
    ) -> Result<PhaseOutcome, PhaseError> {
        let doc_task = focus(state, decision)
            .filter(|t| TaskKind::classify(&t.description, &t.target) == TaskKind::Documentation);
        let objective = decision
            .objective_id
            .and_then(|id| state.objectives.get(&id));

        let payload = json!({
            "phase": "documentation",
            "task": doc_task.map(task_json),
            "objective": objective.map(objective_json),
            "completed_tasks": state
                .tasks_in(decision.objective_id)
                .into_iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .map(|t| json!({ "description": t.description, "target": t.target }))
                .collect::<Vec<_>>(),
        });

        let reason = match dispatch(ctx, "documentation", WRITER, payload).await? {
            Reply::Accepted(_) => {
                return Ok(match (doc_task, objective) {
                    (Some(task), _) => PhaseOutcome::succeeded(format!("Documented {}", task.id))
                        .with_task_change(task.id, TaskChange::Status(TaskStatus::Completed)),
                    (None, Some(objective)) => PhaseOutcome {
                        documented: Some(objective.id),
                        ..PhaseOutcome::succeeded(format!("Documented {}", objective.id))
                    },
                    (None, None) => PhaseOutcome::succeeded("Documentation written"),
                });
            }
            Reply::Rejected(reason) => reason,
        };
        let outcome = PhaseOutcome::failed(reason.clone());
        Ok(match doc_task {
            Some(task) => outcome.with_task_change(task.id, TaskChange::AttemptFailed { error: reason }),
            None => outcome,
        })
    }
}

/// Propose new objectives for the project.
pub struct ProjectPlanning;

#[async_trait]
impl PhaseHandler for ProjectPlanning {
    async fn execute(
        &self,
        ctx: &Context,
        state: &PipelineState,
        _decision: &Decision,
    ) -> Result<PhaseOutcome, PhaseError> {
        let payload = json!({
            "phase": "project_planning",
            "objectives": state.objectives.values().map(|o| json!({
                "id": o.id,
                "title": o.title,
                "status": o.status,
            })).collect::<Vec<_>>(),
        });
        match dispatch(ctx, "project_planning", PLANNER, payload).await? {
            Reply::Accepted(result) => {
                let roadmap: Roadmap = decode("roadmap", result)?;
                if roadmap.objectives.is_empty() {
                    return Ok(PhaseOutcome::failed("Planner proposed no objectives"));
                }
                Ok(PhaseOutcome {
                    message: format!("Proposed {} objectives", roadmap.objectives.len()),
                    new_objectives: roadmap.objectives,
                    ..PhaseOutcome::succeeded("")
                })
            }
            Reply::Rejected(reason) => Ok(PhaseOutcome::failed(reason)),
        }
    }
}

pub struct Complete;

#[async_trait]
impl PhaseHandler for Complete {
    async fn execute(
        &self,
        _ctx: &Context,
        _state: &PipelineState,
        _decision: &Decision,
    ) -> Result<PhaseOutcome, PhaseError> {
        Ok(PhaseOutcome::succeeded("All work complete"))
    }
}
