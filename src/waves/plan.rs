//! Plan construction: sub-task specs in, dependency-ordered waves out.
//!
//! `create_plan` layers tasks with Kahn's algorithm so that a task lands one wave
//! after its deepest dependency. `PlanBuilder` takes waves as given and only checks
//! that every dependency points strictly backwards.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::PlanError;

/// One unit of work requested by a phase handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTaskSpec {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl SubTaskSpec {
    pub fn new(id: impl Into<String>, role: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            payload,
            timeout_secs: None,
            depends_on: Vec::new(),
        }
    }

    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }
}

/// A unit of work to decompose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub title: String,
    pub tasks: Vec<SubTaskSpec>,
}

impl Problem {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            tasks: Vec::new(),
        }
    }

    pub fn task(mut self, spec: SubTaskSpec) -> Self {
        self.tasks.push(spec);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerTaskStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Blocked,
}

impl WorkerTaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for WorkerTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTask {
    pub id: String,
    pub role: String,
    pub payload: Value,
    /// Falls back to the executor's `task_timeout` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub depends_on: Vec<String>,
    pub status: WorkerTaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    pub attempts: u32,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerTask {
    fn from_spec(spec: &SubTaskSpec, context: &Value) -> Self {
        Self {
            id: spec.id.clone(),
            role: spec.role.clone(),
            payload: merge_context(&spec.payload, context),
            timeout_secs: spec.timeout_secs,
            depends_on: spec.depends_on.clone(),
            status: WorkerTaskStatus::Pending,
            worker: None,
            attempts: 0,
            duration: Duration::ZERO,
            result: None,
            error: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn succeeded(&self) -> bool {
        self.status == WorkerTaskStatus::Succeeded
    }
}

/// Context keys fill in whatever the payload does not set itself. A non-object
/// payload is kept under `input`.
fn merge_context(payload: &Value, context: &Value) -> Value {
    let mut merged = match payload {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("input".to_string(), other.clone());
            map
        }
    };
    if let Value::Object(ctx) = context {
        for (key, value) in ctx {
            merged.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    Value::Object(merged)
}

/// Mutually independent tasks that may run at the same time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wave {
    pub index: usize,
    pub tasks: Vec<WorkerTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationPlan {
    pub title: String,
    pub waves: Vec<Wave>,
}

impl OrchestrationPlan {
    pub fn wave_count(&self) -> usize {
        self.waves.len()
    }

    pub fn task_count(&self) -> usize {
        self.waves.iter().map(|w| w.tasks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.task_count() == 0
    }

    /// Tasks in plan order: wave by wave, then as listed.
    pub fn tasks(&self) -> impl Iterator<Item = &WorkerTask> {
        self.waves.iter().flat_map(|w| w.tasks.iter())
    }

    pub fn task(&self, id: &str) -> Option<&WorkerTask> {
        self.tasks().find(|t| t.id == id)
    }

    pub fn wave_of(&self, id: &str) -> Option<usize> {
        self.waves
            .iter()
            .find(|w| w.tasks.iter().any(|t| t.id == id))
            .map(|w| w.index)
    }
}

fn index_specs<'a>(
    specs: impl Iterator<Item = &'a SubTaskSpec>,
) -> Result<HashMap<&'a str, usize>, PlanError> {
    let mut index = HashMap::new();
    for (i, spec) in specs.enumerate() {
        if index.insert(spec.id.as_str(), i).is_some() {
            return Err(PlanError::DuplicateTask {
                id: spec.id.clone(),
            });
        }
    }
    Ok(index)
}

/// Layer `problem` into waves. `context` is merged into every payload.
pub fn create_plan(problem: &Problem, context: &Value) -> Result<OrchestrationPlan, PlanError> {
    let specs = &problem.tasks;
    let index = index_specs(specs.iter())?;

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
    let mut in_degree: Vec<usize> = vec![0; specs.len()];
    for (to, spec) in specs.iter().enumerate() {
        for dep in &spec.depends_on {
            let from = *index
                .get(dep.as_str())
                .ok_or_else(|| PlanError::UnknownDependency {
                    task: spec.id.clone(),
                    dependency: dep.clone(),
                })?;
            dependents[from].push(to);
            in_degree[to] += 1;
        }
    }

    let mut layer: Vec<usize> = vec![0; specs.len()];
    let mut queue: Vec<usize> = (0..specs.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut processed = 0;
    while let Some(node) = queue.pop() {
        processed += 1;
        for &next in &dependents[node] {
            layer[next] = layer[next].max(layer[node] + 1);
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push(next);
            }
        }
    }

    if processed != specs.len() {
        let tasks = specs
            .iter()
            .enumerate()
            .filter(|&(i, _)| in_degree[i] > 0)
            .map(|(_, s)| s.id.clone())
            .collect();
        return Err(PlanError::Cycle { tasks });
    }

    let depth = layer.iter().max().map_or(0, |d| d + 1);
    let mut waves: Vec<Wave> = (0..depth)
        .map(|index| Wave {
            index,
            tasks: Vec::new(),
        })
        .collect();
    for (i, spec) in specs.iter().enumerate() {
        waves[layer[i]].tasks.push(WorkerTask::from_spec(spec, context));
    }

    tracing::debug!(
        title = %problem.title,
        tasks = specs.len(),
        waves = waves.len(),
        "Plan created"
    );

    Ok(OrchestrationPlan {
        title: problem.title.clone(),
        waves,
    })
}

/// Builds a plan from explicit waves.
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    title: String,
    context: Value,
    waves: Vec<Vec<SubTaskSpec>>,
}

impl PlanBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            context: Value::Null,
            waves: Vec::new(),
        }
    }

    pub fn context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn wave(mut self, tasks: Vec<SubTaskSpec>) -> Self {
        self.waves.push(tasks);
        self
    }

    pub fn build(self) -> Result<OrchestrationPlan, PlanError> {
        let index = index_specs(self.waves.iter().flatten())?;
        let wave_of: HashMap<&str, usize> = self
            .waves
            .iter()
            .enumerate()
            .flat_map(|(w, tasks)| tasks.iter().map(move |t| (t.id.as_str(), w)))
            .collect();

        for (w, tasks) in self.waves.iter().enumerate() {
            for spec in tasks {
                for dep in &spec.depends_on {
                    if !index.contains_key(dep.as_str()) {
                        return Err(PlanError::UnknownDependency {
                            task: spec.id.clone(),
                            dependency: dep.clone(),
                        });
                    }
                    if wave_of[dep.as_str()] >= w {
                        return Err(PlanError::ForwardReference {
                            task: spec.id.clone(),
                            dependency: dep.clone(),
                            wave: w,
                        });
                    }
                }
            }
        }

        let waves = self
            .waves
            .iter()
            .enumerate()
            .map(|(index, tasks)| Wave {
                index,
                tasks: tasks
                    .iter()
                    .map(|spec| WorkerTask::from_spec(spec, &self.context))
                    .collect(),
            })
            .collect();

        Ok(OrchestrationPlan {
            title: self.title,
            waves,
        })
    }
}

/// Durations as milliseconds.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(id: &str, deps: &[&str]) -> SubTaskSpec {
        SubTaskSpec::new(id, "coder", json!({ "id": id })).after(deps.iter().copied())
    }

    fn ids(wave: &Wave) -> Vec<&str> {
        wave.tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_create_plan_layers_by_deepest_dependency() {
        let problem = Problem::new("diamond")
            .task(spec("a", &[]))
            .task(spec("b", &["a"]))
            .task(spec("c", &["a"]))
            .task(spec("d", &["b", "c"]))
            .task(spec("e", &["a", "d"]));

        let plan = create_plan(&problem, &Value::Null).unwrap();

        assert_eq!(plan.wave_count(), 4);
        assert_eq!(ids(&plan.waves[0]), vec!["a"]);
        assert_eq!(ids(&plan.waves[1]), vec!["b", "c"]);
        assert_eq!(ids(&plan.waves[2]), vec!["d"]);
        assert_eq!(ids(&plan.waves[3]), vec!["e"]);
        assert_eq!(plan.wave_of("e"), Some(3));
    }

    #[test]
    fn test_create_plan_independent_tasks_share_a_wave() {
        let problem = Problem::new("flat")
            .task(spec("x", &[]))
            .task(spec("y", &[]))
            .task(spec("z", &[]));
        let plan = create_plan(&problem, &Value::Null).unwrap();
        assert_eq!(plan.wave_count(), 1);
        assert_eq!(ids(&plan.waves[0]), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_context_is_merged_without_overriding_payload() {
        let problem = Problem::new("ctx")
            .task(SubTaskSpec::new("a", "coder", json!({ "file": "src/lib.rs" })))
            .task(SubTaskSpec::new("b", "coder", json!("raw text")));
        let context = json!({ "file": "ignored", "objective": "auth" });

        let plan = create_plan(&problem, &context).unwrap();

        let a = plan.task("a").unwrap();
        assert_eq!(a.payload, json!({ "file": "src/lib.rs", "objective": "auth" }));
        let b = plan.task("b").unwrap();
        assert_eq!(b.payload, json!({ "input": "raw text", "file": "ignored", "objective": "auth" }));
    }

    #[test]
    fn test_create_plan_rejects_cycle() {
        let problem = Problem::new("cycle")
            .task(spec("a", &["c"]))
            .task(spec("b", &["a"]))
            .task(spec("c", &["b"]))
            .task(spec("free", &[]));
        match create_plan(&problem, &Value::Null).unwrap_err() {
            PlanError::Cycle { tasks } => {
                assert_eq!(tasks, vec!["a".to_string(), "b".into(), "c".into()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_create_plan_rejects_self_dependency() {
        let problem = Problem::new("self").task(spec("a", &["a"]));
        assert!(matches!(
            create_plan(&problem, &Value::Null),
            Err(PlanError::Cycle { .. })
        ));
    }

    #[test]
    fn test_create_plan_rejects_unknown_and_duplicate_ids() {
        let unknown = Problem::new("u").task(spec("a", &["ghost"]));
        assert_eq!(
            create_plan(&unknown, &Value::Null).unwrap_err(),
            PlanError::UnknownDependency {
                task: "a".into(),
                dependency: "ghost".into()
            }
        );

        let duplicate = Problem::new("d").task(spec("a", &[])).task(spec("a", &[]));
        assert_eq!(
            create_plan(&duplicate, &Value::Null).unwrap_err(),
            PlanError::DuplicateTask { id: "a".into() }
        );
    }

    #[test]
    fn test_empty_problem_gives_empty_plan() {
        let plan = create_plan(&Problem::new("nothing"), &Value::Null).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.wave_count(), 0);
    }

    #[test]
    fn test_builder_accepts_backward_references() {
        let plan = PlanBuilder::new("debug")
            .context(json!({ "task": 7 }))
            .wave(vec![spec("analyst-1", &[]), spec("analyst-2", &[])])
            .wave(vec![spec("fixer", &["analyst-1", "analyst-2"])])
            .build()
            .unwrap();
        assert_eq!(plan.wave_count(), 2);
        assert_eq!(plan.task("fixer").unwrap().payload["task"], json!(7));
    }

    #[test]
    fn test_builder_rejects_same_wave_reference() {
        let err = PlanBuilder::new("bad")
            .wave(vec![spec("a", &[]), spec("b", &["a"])])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::ForwardReference {
                task: "b".into(),
                dependency: "a".into(),
                wave: 0
            }
        );
    }

    #[test]
    fn test_builder_rejects_later_wave_reference() {
        let err = PlanBuilder::new("bad")
            .wave(vec![spec("a", &["b"])])
            .wave(vec![spec("b", &[])])
            .build()
            .unwrap_err();
        assert!(matches!(err, PlanError::ForwardReference { wave: 0, .. }));
    }

    #[test]
    fn test_worker_task_serializes_duration_as_millis() {
        let plan = create_plan(&Problem::new("t").task(spec("a", &[])), &Value::Null).unwrap();
        let mut task = plan.task("a").unwrap().clone();
        task.duration = Duration::from_millis(1500);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["duration"], json!(1500));
        assert_eq!(json["status"], json!("pending"));
    }
}
