//! Wave executor: runs a plan wave by wave with bounded parallelism.
//!
//! Waves are separated by a barrier. Inside a wave every runnable task competes
//! for one of `max_workers` semaphore permits, leases a worker for its role, and
//! is cut off by `tokio::time::timeout`. A task whose predecessor did not succeed
//! is marked `blocked` before its wave starts and never dispatched.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;

use super::plan::{OrchestrationPlan, WorkerTask, WorkerTaskStatus, duration_serde};
use crate::errors::WorkerError;
use crate::workers::{WorkerInvoker, WorkerRegistry};

/// Executor settings, taken from `[waves]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveConfig {
    pub max_workers: usize,
    pub max_attempts: u32,
    /// Used for tasks that carry no timeout of their own.
    pub task_timeout: Duration,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_attempts: 2,
            task_timeout: Duration::from_secs(300),
        }
    }
}

/// Progress events emitted while a plan runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanEvent {
    WaveStarted {
        wave: usize,
        tasks: Vec<String>,
    },
    TaskStarted {
        task: String,
        wave: usize,
        worker: String,
        attempt: u32,
    },
    TaskCompleted {
        task: String,
        status: WorkerTaskStatus,
        #[serde(with = "duration_serde")]
        duration: Duration,
    },
    TaskBlocked {
        task: String,
        wave: usize,
        blocked_by: Vec<String>,
    },
    WaveCompleted {
        wave: usize,
        succeeded: usize,
        failed: usize,
        blocked: usize,
    },
}

/// Outcome of a whole plan.
#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub title: String,
    /// Every task in plan order, with its final status.
    pub tasks: Vec<WorkerTask>,
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    #[serde(with = "duration_serde")]
    pub wall_clock: Duration,
    /// `total_duration / wall_clock`; 0 when nothing ran.
    pub parallel_efficiency: f64,
    /// Last error for each task that did not succeed.
    #[serde(skip)]
    pub errors: BTreeMap<String, WorkerError>,
}

impl PlanReport {
    pub fn task(&self, id: &str) -> Option<&WorkerTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn count(&self, status: WorkerTaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.tasks.iter().all(WorkerTask::succeeded)
    }

    pub fn successes(&self) -> impl Iterator<Item = &WorkerTask> {
        self.tasks.iter().filter(|t| t.succeeded())
    }

    /// The first non-successful task with its error, in plan order.
    pub fn first_failure(&mut self) -> Option<(WorkerTask, WorkerError)> {
        let task = self
            .tasks
            .iter()
            .find(|t| matches!(t.status, WorkerTaskStatus::Failed | WorkerTaskStatus::TimedOut))?
            .clone();
        let error = self.errors.remove(&task.id)?;
        Some((task, error))
    }
}

/// What one dispatch loop produced for a task.
struct TaskRun {
    status: WorkerTaskStatus,
    worker: Option<String>,
    attempts: u32,
    duration: Duration,
    result: Option<Value>,
    error: Option<WorkerError>,
}

pub struct WaveExecutor {
    registry: Arc<WorkerRegistry>,
    invoker: Arc<dyn WorkerInvoker>,
    config: WaveConfig,
    event_tx: Option<mpsc::Sender<PlanEvent>>,
}

impl WaveExecutor {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        invoker: Arc<dyn WorkerInvoker>,
        config: WaveConfig,
    ) -> Self {
        Self {
            registry,
            invoker,
            config,
            event_tx: None,
        }
    }

    /// Set the event channel for progress updates.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<PlanEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &WaveConfig {
        &self.config
    }

    pub async fn execute_plan(&self, plan: OrchestrationPlan) -> PlanReport {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut finished: HashMap<String, WorkerTaskStatus> = HashMap::new();
        let mut errors = BTreeMap::new();
        let mut done: Vec<WorkerTask> = Vec::with_capacity(plan.task_count());

        for wave in plan.waves {
            let index = wave.index;
            let wave_start = done.len();
            let order: Vec<String> = wave.tasks.iter().map(|t| t.id.clone()).collect();
            let mut runnable = Vec::new();
            for mut task in wave.tasks {
                let blocked_by: Vec<String> = task
                    .depends_on
                    .iter()
                    .filter(|dep| finished.get(dep.as_str()) != Some(&WorkerTaskStatus::Succeeded))
                    .cloned()
                    .collect();
                if blocked_by.is_empty() {
                    runnable.push(task);
                    continue;
                }
                tracing::info!(task = %task.id, wave = index, ?blocked_by, "Worker task blocked");
                task.status = WorkerTaskStatus::Blocked;
                task.error = Some(format!("blocked by {}", blocked_by.join(", ")));
                self.emit(PlanEvent::TaskBlocked {
                    task: task.id.clone(),
                    wave: index,
                    blocked_by,
                })
                .await;
                finished.insert(task.id.clone(), task.status);
                done.push(task);
            }

            self.emit(PlanEvent::WaveStarted {
                wave: index,
                tasks: runnable.iter().map(|t| t.id.clone()).collect(),
            })
            .await;

            let runs = join_all(runnable.iter().map(|task| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    // The semaphore is never closed.
                    let _permit = semaphore.acquire_owned().await.ok();
                    self.run_task(task, index).await
                }
            }))
            .await;

            for (mut task, run) in runnable.into_iter().zip(runs) {
                task.status = run.status;
                task.worker = run.worker;
                task.attempts = run.attempts;
                task.duration = run.duration;
                task.result = run.result;
                task.error = run.error.as_ref().map(ToString::to_string);
                if let Some(error) = run.error {
                    errors.insert(task.id.clone(), error);
                }
                self.emit(PlanEvent::TaskCompleted {
                    task: task.id.clone(),
                    status: task.status,
                    duration: task.duration,
                })
                .await;
                finished.insert(task.id.clone(), task.status);
                done.push(task);
            }
            done[wave_start..].sort_by_key(|t| order.iter().position(|id| *id == t.id));

            let in_wave = |status: WorkerTaskStatus| {
                done[wave_start..]
                    .iter()
                    .filter(|t| t.status == status)
                    .count()
            };
            let succeeded = in_wave(WorkerTaskStatus::Succeeded);
            let failed = in_wave(WorkerTaskStatus::Failed) + in_wave(WorkerTaskStatus::TimedOut);
            let blocked = in_wave(WorkerTaskStatus::Blocked);
            tracing::debug!(wave = index, succeeded, failed, blocked, "Wave completed");
            self.emit(PlanEvent::WaveCompleted {
                wave: index,
                succeeded,
                failed,
                blocked,
            })
            .await;
        }

        let wall_clock = started.elapsed();
        let total_duration: Duration = done.iter().map(|t| t.duration).sum();
        let parallel_efficiency = if wall_clock.is_zero() {
            0.0
        } else {
            total_duration.as_secs_f64() / wall_clock.as_secs_f64()
        };

        PlanReport {
            title: plan.title,
            tasks: done,
            total_duration,
            wall_clock,
            parallel_efficiency,
            errors,
        }
    }

    /// Dispatch one task, retrying transient failures up to `max_attempts`.
    async fn run_task(&self, task: &WorkerTask, wave: usize) -> TaskRun {
        let timeout = task.timeout().unwrap_or(self.config.task_timeout);
        let max_attempts = self.config.max_attempts.max(1);
        let started = Instant::now();
        let mut worker = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.dispatch(task, wave, attempt, timeout, &mut worker).await {
                Ok(result) => {
                    return TaskRun {
                        status: WorkerTaskStatus::Succeeded,
                        worker,
                        attempts: attempt,
                        duration: started.elapsed(),
                        result: Some(result),
                        error: None,
                    };
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::warn!(task = %task.id, attempt, error = %e, "Worker task failed, retrying");
                }
                Err(e) => {
                    tracing::warn!(task = %task.id, attempts = attempt, error = %e, "Worker task gave up");
                    let status = if matches!(e, WorkerError::Timeout { .. }) {
                        WorkerTaskStatus::TimedOut
                    } else {
                        WorkerTaskStatus::Failed
                    };
                    return TaskRun {
                        status,
                        worker,
                        attempts: attempt,
                        duration: started.elapsed(),
                        result: None,
                        error: Some(e),
                    };
                }
            }
        }
    }

    async fn dispatch(
        &self,
        task: &WorkerTask,
        wave: usize,
        attempt: u32,
        timeout: Duration,
        assigned: &mut Option<String>,
    ) -> Result<Value, WorkerError> {
        let lease = self.registry.acquire(&task.role).await?;
        let worker = lease.worker();
        *assigned = Some(worker.id.clone());
        self.emit(PlanEvent::TaskStarted {
            task: task.id.clone(),
            wave,
            worker: worker.id.clone(),
            attempt,
        })
        .await;

        let invoked = tokio::time::timeout(
            timeout,
            self.invoker.invoke(worker, &task.role, &task.payload, timeout),
        )
        .await
        .unwrap_or_else(|_| {
            Err(WorkerError::Timeout {
                worker: worker.id.clone(),
                role: task.role.clone(),
                timeout,
            })
        });

        match invoked {
            Ok(response) if response.success => {
                self.registry.report_success(&worker.id);
                Ok(response.result)
            }
            Ok(response) => {
                self.registry.report_success(&worker.id);
                Err(WorkerError::Rejected {
                    worker: worker.id.clone(),
                    message: response
                        .error
                        .unwrap_or_else(|| "worker reported failure".to_string()),
                })
            }
            Err(e) => {
                if !matches!(e, WorkerError::NoWorkerAvailable { .. }) {
                    self.registry.report_failure(&worker.id);
                }
                Err(e)
            }
        }
    }

    async fn emit(&self, event: PlanEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use super::*;
    use crate::waves::plan::{PlanBuilder, Problem, SubTaskSpec, create_plan};
    use crate::workers::invoker::mock::{MockInvoker, MockReply};
    use crate::workers::registry::fixed::registry;

    fn timed(id: &str, secs: u64) -> SubTaskSpec {
        SubTaskSpec::new(id, "coder", json!({ "secs": secs }))
    }

    /// Sleeps for `payload.secs`, fails when `payload.fail` is set.
    fn sleeper() -> Arc<MockInvoker> {
        Arc::new(MockInvoker::new(|_, _, payload| {
            let secs = payload["secs"].as_u64().unwrap_or(0);
            let reply = if payload["fail"].as_bool().unwrap_or(false) {
                MockReply::failed("refused")
            } else {
                MockReply::ok(json!({ "slept": secs }))
            };
            reply.after(Duration::from_secs(secs))
        }))
    }

    async fn executor(invoker: Arc<MockInvoker>, config: WaveConfig) -> WaveExecutor {
        let registry = registry(&[("w1", &["coder", "reviewer"], 8)]).await;
        WaveExecutor::new(registry, invoker, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_efficiency_of_one_wave() {
        let problem = Problem::new("four")
            .task(timed("a", 45))
            .task(timed("b", 38))
            .task(timed("c", 52))
            .task(timed("d", 41));
        let plan = create_plan(&problem, &Value::Null).unwrap();
        let exec = executor(sleeper(), WaveConfig::default()).await;

        let report = exec.execute_plan(plan).await;

        assert!(report.all_succeeded());
        assert_eq!(report.wall_clock, Duration::from_secs(52));
        assert_eq!(report.total_duration, Duration::from_secs(176));
        assert!((report.parallel_efficiency - 176.0 / 52.0).abs() < 1e-9);
        assert_eq!(report.task("c").unwrap().duration, Duration::from_secs(52));
    }

    #[tokio::test(start_paused = true)]
    async fn test_semaphore_bounds_concurrency() {
        let problem = (0..4).fold(Problem::new("bounded"), |p, i| {
            p.task(timed(&format!("t{}", i), 10))
        });
        let plan = create_plan(&problem, &Value::Null).unwrap();
        let config = WaveConfig {
            max_workers: 2,
            ..WaveConfig::default()
        };
        let report = executor(sleeper(), config).await.execute_plan(plan).await;

        assert_eq!(report.wall_clock, Duration::from_secs(20));
        assert!((report.parallel_efficiency - 2.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_worker_queues_tasks_instead_of_failing() {
        let problem = (0..3).fold(Problem::new("reviews"), |p, i| {
            p.task(SubTaskSpec::new(format!("r{}", i), "reviewer", json!({ "secs": 10 })))
        });
        let plan = create_plan(&problem, &Value::Null).unwrap();
        let invoker = sleeper();
        let registry = registry(&[("w1", &["reviewer"], 1)]).await;
        let exec = WaveExecutor::new(Arc::clone(&registry), Arc::clone(&invoker) as Arc<dyn WorkerInvoker>, WaveConfig::default());

        let report = exec.execute_plan(plan).await;

        assert_eq!(report.count(WorkerTaskStatus::Succeeded), 3);
        assert!(report.tasks.iter().all(|t| t.attempts == 1));
        assert_eq!(invoker.calls().len(), 3);
        // One slot means the three reviews run back to back.
        assert_eq!(report.wall_clock, Duration::from_secs(30));
        assert_eq!(registry.load("w1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_predecessor_blocks_dependents() {
        let invoker = sleeper();
        let plan = PlanBuilder::new("blocked")
            .wave(vec![
                SubTaskSpec::new("bad", "coder", json!({ "secs": 1, "fail": true })),
                timed("good", 1),
            ])
            .wave(vec![
                timed("after-bad", 1).after(["bad"]),
                timed("after-good", 1).after(["good"]),
            ])
            .wave(vec![timed("transitive", 1).after(["after-bad"])])
            .build()
            .unwrap();

        let mut report = executor(Arc::clone(&invoker), WaveConfig::default())
            .await
            .execute_plan(plan)
            .await;

        let status = |id: &str| report.task(id).unwrap().status;
        assert_eq!(status("bad"), WorkerTaskStatus::Failed);
        assert_eq!(status("good"), WorkerTaskStatus::Succeeded);
        assert_eq!(status("after-bad"), WorkerTaskStatus::Blocked);
        assert_eq!(status("after-good"), WorkerTaskStatus::Succeeded);
        assert_eq!(status("transitive"), WorkerTaskStatus::Blocked);

        let dispatched: Vec<Value> = invoker.calls().into_iter().map(|c| c.payload).collect();
        assert_eq!(dispatched.len(), 3);

        // Rejections are not retried.
        assert_eq!(report.task("bad").unwrap().attempts, 1);
        let (task, error) = report.first_failure().unwrap();
        assert_eq!(task.id, "bad");
        assert!(matches!(error, WorkerError::Rejected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waves_are_separated_by_a_barrier() {
        let (tx, mut rx) = mpsc::channel(64);
        let plan = create_plan(
            &Problem::new("barrier")
                .task(timed("slow", 30))
                .task(timed("fast", 1))
                .task(timed("next", 1).after(["fast"])),
            &Value::Null,
        )
        .unwrap();
        let report = executor(sleeper(), WaveConfig::default())
            .await
            .with_event_channel(tx)
            .execute_plan(plan)
            .await;
        assert!(report.all_succeeded());
        assert_eq!(report.wall_clock, Duration::from_secs(31));

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let position = |pred: &dyn Fn(&PlanEvent) -> bool| events.iter().position(pred).unwrap();
        let slow_done = position(&|e: &PlanEvent| {
            matches!(e, PlanEvent::TaskCompleted { task, .. } if task == "slow")
        });
        let next_started = position(&|e: &PlanEvent| {
            matches!(e, PlanEvent::TaskStarted { task, .. } if task == "next")
        });
        assert!(slow_done < next_started);
        assert!(matches!(events.last(), Some(PlanEvent::WaveCompleted { wave: 1, succeeded: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let invoker = Arc::new(MockInvoker::new(move |worker, _, _| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                MockReply::err(WorkerError::Decode {
                    worker: worker.id.clone(),
                    message: "garbage".into(),
                })
            } else {
                MockReply::ok(json!("fine"))
            }
        }));
        let plan = create_plan(&Problem::new("retry").task(timed("a", 0)), &Value::Null).unwrap();

        let report = executor(invoker, WaveConfig::default()).await.execute_plan(plan).await;

        let task = report.task("a").unwrap();
        assert_eq!(task.status, WorkerTaskStatus::Succeeded);
        assert_eq!(task.attempts, 2);
        assert_eq!(task.worker.as_deref(), Some("w1"));
        assert_eq!(task.result, Some(json!("fine")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_max_attempts() {
        let invoker = sleeper();
        let plan = create_plan(
            &Problem::new("hang").task(timed("stuck", 600).with_timeout(Duration::from_secs(5))),
            &Value::Null,
        )
        .unwrap();

        let report = executor(Arc::clone(&invoker), WaveConfig::default())
            .await
            .execute_plan(plan)
            .await;

        let task = report.task("stuck").unwrap();
        assert_eq!(task.status, WorkerTaskStatus::TimedOut);
        assert_eq!(task.attempts, 2);
        assert_eq!(invoker.calls().len(), 2);
        assert_eq!(report.wall_clock, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_role_fails_without_dispatch() {
        let invoker = sleeper();
        let plan = create_plan(
            &Problem::new("nobody").task(SubTaskSpec::new("w", "writer", json!({}))),
            &Value::Null,
        )
        .unwrap();

        let mut report = executor(Arc::clone(&invoker), WaveConfig::default())
            .await
            .execute_plan(plan)
            .await;

        assert_eq!(report.count(WorkerTaskStatus::Failed), 1);
        assert!(invoker.calls().is_empty());
        let (_, error) = report.first_failure().unwrap();
        assert!(matches!(error, WorkerError::NoWorkerAvailable { .. }));
    }

    #[tokio::test]
    async fn test_empty_plan_report() {
        let plan = create_plan(&Problem::new("empty"), &Value::Null).unwrap();
        let report = executor(sleeper(), WaveConfig::default()).await.execute_plan(plan).await;
        assert!(report.tasks.is_empty());
        assert_eq!(report.parallel_efficiency, 0.0);
    }
}
