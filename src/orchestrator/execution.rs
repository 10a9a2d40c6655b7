//! The execution loop.
//!
//! ```text
//! load state ─▶ refresh workers ─▶ apply signals ─▶ select objective / task
//!      ▲                                                   │
//!      │                                              next_phase
//!      │                                                   │
//!   save ◀── merge outcome ◀── execute handler ◀── loop detection
//! ```

use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::context::Context;
use super::phases::{Decision, PhaseTable, record_attempt_failure};
use crate::errors::{PipelineError, StateError};
use crate::loop_detect::{
    Action, Candidate, LoopDetector, LoopKind, LoopVerdict, Severity, should_intervene,
    state_fingerprint,
};
use crate::phase::{Phase, next_phase};
use crate::state::{ObjectiveId, PhaseRecord, PipelineState, TaskId};

/// Phase records included in an escalation report.
const ESCALATION_HISTORY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The `complete` phase ran.
    Completed,
    /// Stopped at `max_iterations`; the state is safe to resume.
    IterationLimit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Iterations executed by this run.
    pub iterations: u64,
    pub phase: Phase,
    pub completion_percentage: f64,
}

#[derive(Debug, Serialize)]
struct EscalationReport<'a> {
    run_id: Uuid,
    iteration: u64,
    phase: Phase,
    remediation: Phase,
    task_id: Option<TaskId>,
    objective_id: Option<ObjectiveId>,
    consecutive_loops: u32,
    /// Any critical verdict, or two high ones, in the current streak.
    intervention_required: bool,
    verdict: &'a LoopVerdict,
    recent_phases: Vec<&'a PhaseRecord>,
}

enum Step {
    Continue,
    Complete,
}

enum Guarded {
    Run(Decision),
    Escalated,
}

pub struct ExecutionLoop<'a> {
    ctx: &'a Context,
    table: PhaseTable,
    detector: LoopDetector,
    consecutive_loops: u32,
    /// Verdicts of the current run of consecutive detections.
    streak: Vec<LoopVerdict>,
}

impl<'a> ExecutionLoop<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            table: PhaseTable::standard(),
            detector: LoopDetector::new(ctx.config.toml.loop_detection.clone()),
            consecutive_loops: 0,
            streak: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: PhaseTable) -> Self {
        self.table = table;
        self
    }

    /// Load the state, creating it when there is none. Corrupt or incompatible
    /// documents are never replaced.
    pub fn load_state(&self) -> Result<PipelineState, PipelineError> {
        match self.ctx.store.load() {
            Ok(state) => Ok(state),
            Err(StateError::Missing { path }) => {
                tracing::warn!(path = %path.display(), "No state document; initializing a new one");
                Ok(self.ctx.store.initialize(Utc::now())?)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn run(&mut self) -> Result<RunReport, PipelineError> {
        let mut state = self.load_state()?;
        state.reset_failure_streaks();
        let max_iterations = self.ctx.config.max_iterations();

        tracing::info!(
            run_id = %state.run_id,
            iteration = state.iteration,
            max_iterations,
            "Execution loop starting"
        );

        let mut iterations = 0;
        let outcome = loop {
            if iterations >= max_iterations {
                tracing::info!(iterations, "Iteration limit reached");
                break RunOutcome::IterationLimit;
            }
            let step = self.step(&mut state).await?;
            iterations += 1;
            if let Step::Complete = step {
                tracing::info!(iterations, "All work complete");
                break RunOutcome::Completed;
            }
        };

        Ok(RunReport {
            outcome,
            iterations,
            phase: state.phase,
            completion_percentage: state.completion_percentage(),
        })
    }

    async fn step(&mut self, state: &mut PipelineState) -> Result<Step, PipelineError> {
        let started = Instant::now();
        let now = Utc::now();

        let healthy = self.ctx.registry.refresh().await;
        tracing::debug!(healthy, "Worker health refreshed");
        let consumed = self
            .ctx
            .signals
            .apply_pending(state, self.ctx.bands(), now);
        if !consumed.is_empty() {
            // Persist before acknowledging so a crash mid-phase keeps the signals.
            state.updated_at = now;
            self.ctx.store.save(state)?;
            if let Err(e) = self.ctx.signals.acknowledge(&consumed) {
                tracing::warn!(error = %e, "Could not acknowledge applied signals");
            }
        }
        state.update_all_progress(now);

        let decision = match self.decide(state, now) {
            Ok(decision) => decision,
            Err(PipelineError::SchedulingDeadlock) => {
                tracing::warn!(
                    iteration = state.iteration,
                    incomplete = state.incomplete_objectives(),
                    "{}",
                    PipelineError::SchedulingDeadlock
                );
                self.finish(state)?;
                return Ok(Step::Continue);
            }
            Err(e) => return Err(e),
        };

        let decision = match self.guard(state, decision)? {
            Guarded::Run(decision) => decision,
            Guarded::Escalated => {
                self.finish(state)?;
                return Ok(Step::Continue);
            }
        };

        tracing::info!(
            iteration = state.iteration,
            phase = %decision.phase,
            task = ?decision.task_id,
            objective = ?decision.objective_id,
            "Executing phase"
        );

        let (success, message) = match self.table.execute(self.ctx, state, &decision).await {
            Ok(outcome) => match outcome.apply(self.ctx, state, &decision, now) {
                Ok(()) => (outcome.success, outcome.message),
                Err(e) => {
                    let err = PipelineError::from(crate::errors::PhaseError::from(e));
                    tracing::warn!(error = %err, "Could not merge phase outcome");
                    (false, err.to_string())
                }
            },
            Err(e) => {
                let err = PipelineError::from(e);
                if err.is_fatal() {
                    return Err(err);
                }
                tracing::warn!(phase = %decision.phase, error = %err, "Phase failed");
                if let PipelineError::TransientWorker { .. } = err {
                    self.charge_attempt(state, &decision, &err.to_string());
                }
                (false, err.to_string())
            }
        };

        if let Some(objective) = decision
            .objective_id
            .and_then(|id| state.objectives.get_mut(&id))
        {
            objective.record_outcome(success);
        }
        state.update_all_progress(now);
        state.record_phase(
            PhaseRecord {
                iteration: state.iteration,
                phase: decision.phase,
                success,
                task_id: decision.task_id,
                objective_id: decision.objective_id,
                substituted_for: decision.substituted_for,
                message,
                duration_ms: started.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            },
            self.ctx.config.toml.state.phase_history_depth,
        );

        let action = Action {
            phase: decision.phase,
            task_id: decision.task_id,
            objective_id: decision.objective_id,
        };
        self.detector.record(
            action.fingerprint(),
            state_fingerprint(state),
            target_of(state, decision.task_id),
        );

        self.finish(state)?;
        if decision.phase.is_terminal() {
            Ok(Step::Complete)
        } else {
            Ok(Step::Continue)
        }
    }

    /// Pick the scope and phase for this iteration.
    fn decide(
        &self,
        state: &mut PipelineState,
        now: chrono::DateTime<Utc>,
    ) -> Result<Decision, PipelineError> {
        let max_attempts = self.ctx.max_task_attempts();
        let selection = if state.objectives.is_empty() {
            None
        } else {
            self.ctx.scheduler.select_next(state, now)
        };

        let scope = match selection {
            Some(selection) => {
                let id = selection.objective_id;
                if state.active_objective().is_none() {
                    match state.activate_objective(id, now) {
                        Ok(()) => tracing::info!(objective = %id, score = selection.score, "Objective activated"),
                        Err(e) => tracing::warn!(objective = %id, error = %e, "Could not activate objective"),
                    }
                }
                Some(id)
            }
            None => {
                if !state.has_actionable_tasks(max_attempts) && state.incomplete_objectives() > 0 {
                    return Err(PipelineError::SchedulingDeadlock);
                }
                None
            }
        };

        let phase = next_phase(
            state.focus_status(scope, max_attempts),
            state.objective_presence(),
        );
        Ok(Decision {
            phase,
            task_id: state.focus_task(scope, max_attempts).map(|t| t.id),
            objective_id: scope,
            substituted_for: None,
        })
    }

    /// Consult the loop detector and substitute a remediation when needed.
    fn guard(
        &mut self,
        state: &PipelineState,
        decision: Decision,
    ) -> Result<Guarded, PipelineError> {
        let action = Action {
            phase: decision.phase,
            task_id: decision.task_id,
            objective_id: decision.objective_id,
        };
        let verdict = self.detector.detect(&Candidate {
            action: action.fingerprint(),
            target: target_of(state, decision.task_id),
        });
        let Some(kind) = verdict.kind.filter(|_| verdict.detected) else {
            self.consecutive_loops = 0;
            self.streak.clear();
            return Ok(Guarded::Run(decision));
        };

        self.consecutive_loops += 1;
        self.streak.push(verdict.clone());
        let budget = self.ctx.config.toml.run.loop_budget;
        let warning = PipelineError::LoopDetected {
            kind,
            phase: decision.phase,
        };
        tracing::warn!(
            loop_length = verdict.loop_length,
            confidence = verdict.confidence,
            severity = %verdict.severity,
            consecutive = self.consecutive_loops,
            suggestion = %verdict.suggested_break,
            "{}",
            warning
        );
        if self.consecutive_loops > budget {
            return Err(PipelineError::LoopBudgetExhausted {
                consecutive: self.consecutive_loops,
                budget,
            });
        }

        let remediation = if kind == LoopKind::ModificationLoop && decision.phase != Phase::Debugging {
            Phase::Debugging
        } else {
            decision.phase.remediation()
        };

        if verdict.severity >= Severity::High || remediation == decision.phase {
            let intervention_required = should_intervene(&self.streak);
            let report = EscalationReport {
                run_id: state.run_id,
                iteration: state.iteration,
                phase: decision.phase,
                remediation,
                task_id: decision.task_id,
                objective_id: decision.objective_id,
                consecutive_loops: self.consecutive_loops,
                intervention_required,
                verdict: &verdict,
                recent_phases: state
                    .phase_history
                    .iter()
                    .rev()
                    .take(ESCALATION_HISTORY)
                    .collect(),
            };
            let path = self.ctx.store.write_escalation(kind.to_string().as_str(), &report)?;
            tracing::error!(
                escalation = %path.display(),
                intervention_required,
                "Loop escalated; skipping this iteration"
            );
            return Ok(Guarded::Escalated);
        }

        tracing::info!(from = %decision.phase, to = %remediation, "Substituting remediation phase");
        Ok(Guarded::Run(Decision {
            phase: remediation,
            substituted_for: Some(decision.phase),
            ..decision
        }))
    }

    /// A worker failure that outlived its retries still costs the task an attempt.
    fn charge_attempt(&self, state: &mut PipelineState, decision: &Decision, error: &str) {
        if !matches!(decision.phase, Phase::Coding | Phase::Debugging) {
            return;
        }
        if let Some(task) = decision.task_id.and_then(|id| state.tasks.get_mut(&id)) {
            record_attempt_failure(
                task,
                decision.phase.as_str(),
                error,
                self.ctx.max_task_attempts(),
                self.ctx.error_history_depth(),
                Utc::now(),
            );
        }
        state.rebuild_queue();
    }

    fn finish(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        state.iteration += 1;
        state.updated_at = Utc::now();
        self.ctx.store.save(state)?;
        Ok(())
    }
}

fn target_of(state: &PipelineState, task_id: Option<TaskId>) -> Option<String> {
    task_id
        .and_then(|id| state.tasks.get(&id))
        .map(|t| t.target.clone())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{Value, json};
    use tempfile::tempdir;

    use super::*;
    use crate::config::Config;
    use crate::errors::WorkerError;
    use crate::loop_detect::Fingerprint;
    use crate::orchestrator::signals::Signal;
    use crate::state::{Objective, ObjectiveStatus, TaskStatus};
    use crate::workers::WorkerInfo;
    use crate::workers::invoker::mock::{MockInvoker, MockReply};
    use crate::workers::registry::fixed;

    const ALL_ROLES: &[&str] = &["planner", "coder", "reviewer", "analyst", "fixer", "writer"];

    async fn context(
        dir: &Path,
        max_iterations: u64,
        tweak: impl FnOnce(&mut Config),
        handler: impl Fn(&WorkerInfo, &str, &Value) -> MockReply + Send + Sync + 'static,
    ) -> (Context, Arc<MockInvoker>) {
        let mut config = Config::new(dir)
            .unwrap()
            .with_max_iterations(Some(max_iterations))
            .with_max_workers(Some(4));
        tweak(&mut config);
        let registry = fixed::registry(&[("w1", ALL_ROLES, 8)]).await;
        let invoker = Arc::new(MockInvoker::new(handler));
        (Context::with_workers(config, registry, invoker.clone()), invoker)
    }

    /// Every worker succeeds; the planner proposes one task.
    fn cooperative(_: &WorkerInfo, role: &str, _: &Value) -> MockReply {
        match role {
            "planner" => MockReply::ok(json!({"tasks": [
                {"description": "Implement cache", "target": "src/cache.rs"}
            ]})),
            "reviewer" => MockReply::ok(json!({"verdict": "pass"})),
            _ => MockReply::ok(json!({})),
        }
    }

    /// Reviewers never agree.
    fn split_reviews() -> impl Fn(&WorkerInfo, &str, &Value) -> MockReply + Send + Sync + 'static {
        let counter = AtomicUsize::new(0);
        move |w, role, payload| match role {
            "reviewer" => {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let verdict = ["pass", "fail", "unsure"][n % 3];
                MockReply::ok(json!({ "verdict": verdict }))
            }
            _ => cooperative(w, role, payload),
        }
    }

    fn phases(state: &PipelineState) -> Vec<Phase> {
        state.phase_history.iter().map(|r| r.phase).collect()
    }

    #[tokio::test]
    async fn test_tactical_run_to_completion() {
        let dir = tempdir().unwrap();
        let (ctx, invoker) = context(dir.path(), 20, |_| {}, cooperative).await;

        let report = ExecutionLoop::new(&ctx).run().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.iterations, 4);
        assert_eq!(report.completion_percentage, 100.0);

        let state = ctx.store.load().unwrap();
        assert_eq!(
            phases(&state),
            vec![Phase::Planning, Phase::Coding, Phase::Qa, Phase::Complete]
        );
        assert_eq!(state.iteration, 4);
        assert_eq!(state.phase, Phase::Complete);
        assert_eq!(invoker.calls_for("reviewer"), 3);
    }

    #[tokio::test]
    async fn test_objective_run_documents_and_completes() {
        let dir = tempdir().unwrap();
        let (ctx, invoker) = context(dir.path(), 20, |_| {}, cooperative).await;
        let mut state = ctx.store.initialize(Utc::now()).unwrap();
        let oid = state.add_objective(
            Objective::new(ObjectiveId(0), "Caching", Utc::now())
                .with_status(ObjectiveStatus::Approved),
        );
        ctx.store.save(&state).unwrap();

        let report = ExecutionLoop::new(&ctx).run().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);

        let state = ctx.store.load().unwrap();
        assert_eq!(
            phases(&state),
            vec![
                Phase::Planning,
                Phase::Coding,
                Phase::Qa,
                Phase::Documentation,
                Phase::Complete
            ]
        );
        let objective = state.objective(oid).unwrap();
        assert_eq!(objective.status, ObjectiveStatus::Completed);
        assert!(objective.documented);
        assert_eq!(objective.tasks.len(), 1);
        assert_eq!(objective.success_count, 4);
        assert_eq!(invoker.calls_for("writer"), 1);
    }

    #[tokio::test]
    async fn test_rejected_coding_exhausts_attempts() {
        let dir = tempdir().unwrap();
        let (ctx, _) = context(dir.path(), 20, |_| {}, |w, role, p| match role {
            "coder" => MockReply::failed("tests fail"),
            _ => cooperative(w, role, p),
        })
        .await;

        let report = ExecutionLoop::new(&ctx).run().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);

        let state = ctx.store.load().unwrap();
        let task = state.tasks.values().next().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 3);
        assert_eq!(task.errors.len(), 3);
        let failures = state.phase_history.iter().filter(|r| !r.success).count();
        assert_eq!(failures, 3);
    }

    #[tokio::test]
    async fn test_transient_worker_failures_are_charged_to_the_task() {
        let dir = tempdir().unwrap();
        let (ctx, invoker) = context(dir.path(), 20, |_| {}, |w, role, p| match role {
            "coder" => MockReply::err(WorkerError::Invocation {
                worker: w.id.clone(),
                message: "connection refused".into(),
            }),
            _ => cooperative(w, role, p),
        })
        .await;

        ExecutionLoop::new(&ctx).run().await.unwrap();

        let state = ctx.store.load().unwrap();
        let task = state.tasks.values().next().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.errors[0].message.contains("Transient worker failure"));
        // Three phases, two dispatch attempts each.
        assert_eq!(invoker.calls_for("coder"), 6);
    }

    #[tokio::test]
    async fn test_repeated_qa_is_remediated_with_debugging() {
        let dir = tempdir().unwrap();
        let (ctx, invoker) = context(dir.path(), 6, |_| {}, split_reviews()).await;

        let report = ExecutionLoop::new(&ctx).run().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::IterationLimit);

        let state = ctx.store.load().unwrap();
        let last = state.phase_history.last().unwrap();
        assert_eq!(last.phase, Phase::Debugging);
        assert_eq!(last.substituted_for, Some(Phase::Qa));
        assert!(last.success);
        assert_eq!(invoker.calls_for("fixer"), 1);
        let task = state.tasks.values().next().unwrap();
        assert_eq!(task.status, TaskStatus::QaPending);
    }

    #[tokio::test]
    async fn test_loop_budget_exhaustion_is_fatal() {
        let dir = tempdir().unwrap();
        let (ctx, _) = context(
            dir.path(),
            20,
            |c| c.toml.run.loop_budget = 0,
            split_reviews(),
        )
        .await;

        let err = ExecutionLoop::new(&ctx).run().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::LoopBudgetExhausted {
                consecutive: 1,
                budget: 0
            }
        ));
        assert!(err.is_fatal());
    }

    fn seeded<'c>(ctx: &'c Context, action: &Action, entries: usize) -> ExecutionLoop<'c> {
        let mut execution = ExecutionLoop::new(ctx);
        for i in 0..entries {
            execution
                .detector
                .record(action.fingerprint(), Fingerprint::of(&i), None);
        }
        execution
    }

    #[tokio::test]
    async fn test_severe_loop_is_escalated_not_executed() {
        let dir = tempdir().unwrap();
        let (ctx, _) = context(
            dir.path(),
            10,
            |c| c.toml.loop_detection.repetition_threshold = 7,
            cooperative,
        )
        .await;
        let state = PipelineState::new(Utc::now());
        let action = Action {
            phase: Phase::Qa,
            task_id: Some(TaskId(1)),
            objective_id: None,
        };
        let mut execution = seeded(&ctx, &action, 7);

        let decision = Decision {
            phase: Phase::Qa,
            task_id: Some(TaskId(1)),
            objective_id: None,
            substituted_for: None,
        };
        let guarded = execution.guard(&state, decision).unwrap();
        assert!(matches!(guarded, Guarded::Escalated));
        assert_eq!(execution.consecutive_loops, 1);

        let reports: Vec<_> = std::fs::read_dir(ctx.store.escalations_dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(reports.len(), 1);
        let report: Value =
            serde_json::from_str(&std::fs::read_to_string(&reports[0]).unwrap()).unwrap();
        assert_eq!(report["verdict"]["severity"], "high");
        assert_eq!(report["remediation"], "debugging");
        assert_eq!(report["intervention_required"], false);

        // A second high verdict in the same streak calls for a human.
        let again = Decision {
            phase: Phase::Qa,
            task_id: Some(TaskId(1)),
            objective_id: None,
            substituted_for: None,
        };
        assert!(matches!(
            execution.guard(&state, again).unwrap(),
            Guarded::Escalated
        ));
        assert_eq!(execution.streak.len(), 2);
        assert!(should_intervene(&execution.streak));
    }

    #[tokio::test]
    async fn test_loop_with_no_remediation_is_escalated() {
        let dir = tempdir().unwrap();
        let (ctx, _) = context(dir.path(), 10, |_| {}, cooperative).await;
        let state = PipelineState::new(Utc::now());
        let action = Action {
            phase: Phase::Complete,
            task_id: None,
            objective_id: None,
        };
        let mut execution = seeded(&ctx, &action, 3);
        let decision = Decision {
            phase: Phase::Complete,
            task_id: None,
            objective_id: None,
            substituted_for: None,
        };
        assert!(matches!(
            execution.guard(&state, decision).unwrap(),
            Guarded::Escalated
        ));
    }

    #[tokio::test]
    async fn test_clean_window_resets_consecutive_loops() {
        let dir = tempdir().unwrap();
        let (ctx, _) = context(dir.path(), 10, |_| {}, cooperative).await;
        let state = PipelineState::new(Utc::now());
        let mut execution = ExecutionLoop::new(&ctx);
        execution.consecutive_loops = 2;
        let decision = Decision {
            phase: Phase::Planning,
            task_id: None,
            objective_id: None,
            substituted_for: None,
        };
        assert!(matches!(
            execution.guard(&state, decision).unwrap(),
            Guarded::Run(Decision {
                phase: Phase::Planning,
                substituted_for: None,
                ..
            })
        ));
        assert_eq!(execution.consecutive_loops, 0);
    }

    #[tokio::test]
    async fn test_signals_are_applied_before_selection() {
        let dir = tempdir().unwrap();
        let (ctx, invoker) = context(dir.path(), 20, |_| {}, cooperative).await;
        ctx.signals
            .send(&Signal::AddTask {
                description: "Fix login".into(),
                target: "src/login.rs".into(),
                objective_id: None,
                priority: None,
            })
            .unwrap();

        let report = ExecutionLoop::new(&ctx).run().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(invoker.calls_for("planner"), 0);
        assert!(ctx.signals.pending().is_empty());
    }

    #[tokio::test]
    async fn test_applied_signals_are_saved_before_the_phase_runs() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join(".conductor/state.json");
        let inbox_dir = dir.path().join(".conductor/signals");
        // What the disk looked like while the first worker was busy.
        let seen = Arc::new(std::sync::Mutex::new(None));
        let observed = Arc::clone(&seen);
        let (ctx, _) = context(dir.path(), 1, |_| {}, move |w, role, payload| {
            let mut slot = observed.lock().unwrap();
            if slot.is_none() {
                let saved: Value =
                    serde_json::from_str(&std::fs::read_to_string(&state_path).unwrap()).unwrap();
                let inbox_empty = std::fs::read_dir(&inbox_dir).unwrap().next().is_none();
                *slot = Some((saved["tasks"].as_array().unwrap().len(), inbox_empty));
            }
            cooperative(w, role, payload)
        })
        .await;
        ctx.store.initialize(Utc::now()).unwrap();
        ctx.signals
            .send(&Signal::AddTask {
                description: "Fix login".into(),
                target: "src/login.rs".into(),
                objective_id: None,
                priority: None,
            })
            .unwrap();

        ExecutionLoop::new(&ctx).run().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), Some((1, true)));
        assert!(ctx.signals.pending().is_empty());
    }

    #[tokio::test]
    async fn test_deadlock_idles_without_dispatching() {
        let dir = tempdir().unwrap();
        let (ctx, invoker) = context(dir.path(), 3, |_| {}, cooperative).await;
        let mut state = ctx.store.initialize(Utc::now()).unwrap();
        state.add_objective(Objective::new(ObjectiveId(0), "Unapproved", Utc::now()));
        ctx.store.save(&state).unwrap();

        let report = ExecutionLoop::new(&ctx).run().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::IterationLimit);
        assert_eq!(report.iterations, 3);
        assert!(invoker.calls().is_empty());
        assert_eq!(ctx.store.load().unwrap().iteration, 3);
    }

    #[tokio::test]
    async fn test_corrupt_state_aborts() {
        let dir = tempdir().unwrap();
        let (ctx, _) = context(dir.path(), 3, |_| {}, cooperative).await;
        std::fs::create_dir_all(&ctx.config.conductor_dir).unwrap();
        std::fs::write(ctx.store.state_path(), "{ not json").unwrap();

        let err = ExecutionLoop::new(&ctx).run().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StructuralState(StateError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_state_is_initialized() {
        let dir = tempdir().unwrap();
        let (ctx, _) = context(dir.path(), 1, |_| {}, cooperative).await;
        assert!(!ctx.store.exists());
        let report = ExecutionLoop::new(&ctx).run().await.unwrap();
        assert_eq!(report.iterations, 1);
        assert!(ctx.store.exists());
    }
}
