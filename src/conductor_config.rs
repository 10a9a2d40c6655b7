//! The `.conductor/conductor.toml` file format.
//!
//! Every section and every field has a default, so an empty file (or no file at
//! all) is a valid configuration. Runtime layering with environment variables and
//! CLI flags happens in [`crate::config::Config`].
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "my-service"
//!
//! [run]
//! max_iterations = 100
//! loop_budget = 5
//! max_task_attempts = 3
//!
//! [scheduler]
//! readiness_weight = 0.4
//! priority_weight = 0.3
//! safety_weight = 0.2
//! urgency_weight = 0.1
//!
//! [waves]
//! max_workers = 4
//! task_timeout_secs = 300
//! max_attempts = 2
//! reviewers = 3
//! consensus_min_agreement = 2
//! analysts = 2
//!
//! [loop_detection]
//! window_size = 100
//! repetition_threshold = 3
//!
//! [priority_bands]
//! production_default = 50
//!
//! [state]
//! audit_depth = 20
//! backup_keep = 10
//!
//! [[workers]]
//! id = "local-coder"
//! endpoint = "./bin/worker"
//! roles = ["planner", "coder", "reviewer", "analyst", "fixer", "writer"]
//! capacity = 2
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::loop_detect::LoopConfig;
use crate::scheduler::SchedulerConfig;
use crate::state::PriorityBands;
use crate::waves::WaveConfig;
use crate::workers::WorkerSpec;

/// Worker roles the phase handlers dispatch to.
pub const ROLES: [&str; 6] = ["planner", "coder", "reviewer", "analyst", "fixer", "writer"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// `[run]`: limits of the execution loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
    /// Consecutive loop detections tolerated before the run stops.
    #[serde(default = "default_loop_budget")]
    pub loop_budget: u32,
    /// Attempts a task gets before it is left `failed`.
    #[serde(default = "default_max_task_attempts")]
    pub max_task_attempts: u32,
}

fn default_max_iterations() -> u64 {
    100
}

fn default_loop_budget() -> u32 {
    5
}

fn default_max_task_attempts() -> u32 {
    3
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            loop_budget: default_loop_budget(),
            max_task_attempts: default_max_task_attempts(),
        }
    }
}

/// `[waves]`: parallel dispatch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavesSection {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Attempts per worker task, counting the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_consensus_min_agreement")]
    pub consensus_min_agreement: usize,
    /// Reviewers asked for a verdict in the QA phase.
    #[serde(default = "default_reviewers")]
    pub reviewers: usize,
    /// Analysts run before the fixer in the debugging phase.
    #[serde(default = "default_analysts")]
    pub analysts: usize,
}

fn default_max_workers() -> usize {
    4
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    2
}

fn default_consensus_min_agreement() -> usize {
    2
}

fn default_reviewers() -> usize {
    3
}

fn default_analysts() -> usize {
    2
}

impl Default for WavesSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            task_timeout_secs: default_task_timeout_secs(),
            max_attempts: default_max_attempts(),
            consensus_min_agreement: default_consensus_min_agreement(),
            reviewers: default_reviewers(),
            analysts: default_analysts(),
        }
    }
}

impl WavesSection {
    pub fn to_wave_config(&self) -> WaveConfig {
        WaveConfig {
            max_workers: self.max_workers,
            max_attempts: self.max_attempts,
            task_timeout: Duration::from_secs(self.task_timeout_secs),
        }
    }
}

/// `[state]`: retention of persisted history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSection {
    #[serde(default = "default_audit_depth")]
    pub audit_depth: usize,
    #[serde(default = "default_phase_history_depth")]
    pub phase_history_depth: usize,
    #[serde(default = "default_error_history_depth")]
    pub error_history_depth: usize,
    #[serde(default = "default_backup_keep")]
    pub backup_keep: usize,
}

fn default_audit_depth() -> usize {
    20
}

fn default_phase_history_depth() -> usize {
    50
}

fn default_error_history_depth() -> usize {
    10
}

fn default_backup_keep() -> usize {
    10
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            audit_depth: default_audit_depth(),
            phase_history_depth: default_phase_history_depth(),
            error_history_depth: default_error_history_depth(),
            backup_keep: default_backup_keep(),
        }
    }
}

/// The complete conductor.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConductorToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub waves: WavesSection,
    #[serde(default)]
    pub loop_detection: LoopConfig,
    #[serde(default)]
    pub priority_bands: PriorityBands,
    #[serde(default)]
    pub state: StateSection,
    #[serde(default)]
    pub workers: Vec<WorkerSpec>,
}

impl ConductorToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conductor.toml")
    }

    /// Load `conductor.toml` from `conductor_dir`, or defaults if it is absent.
    pub fn load_or_default(conductor_dir: &Path) -> Result<Self> {
        let path = conductor_dir.join(crate::config::CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize conductor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Check the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.scheduler.validate();
        warnings.extend(self.priority_bands.validate());

        if self.run.max_iterations == 0 {
            warnings.push("run.max_iterations is 0: `run` will stop immediately".to_string());
        }
        if self.run.max_task_attempts == 0 {
            warnings.push("run.max_task_attempts is 0: failed tasks are never retried".to_string());
        }
        if self.waves.max_workers == 0 {
            warnings.push("waves.max_workers is 0: treated as 1".to_string());
        }
        if self.waves.max_attempts == 0 {
            warnings.push("waves.max_attempts is 0: treated as 1".to_string());
        }
        if self.waves.reviewers == 0 || self.waves.analysts == 0 {
            warnings.push("waves.reviewers and waves.analysts must be at least 1".to_string());
        }
        if self.waves.consensus_min_agreement > self.waves.reviewers {
            warnings.push(format!(
                "waves.consensus_min_agreement ({}) exceeds waves.reviewers ({}): QA can never agree",
                self.waves.consensus_min_agreement, self.waves.reviewers
            ));
        }

        let ld = &self.loop_detection;
        if ld.window_size < 4 {
            warnings.push(format!(
                "loop_detection.window_size {} is too small to see a two-step cycle",
                ld.window_size
            ));
        }
        if !(0.0..=1.0).contains(&ld.modification_unique_ratio) {
            warnings.push(format!(
                "loop_detection.modification_unique_ratio {} is outside [0, 1]",
                ld.modification_unique_ratio
            ));
        }

        if self.state.audit_depth == 0 {
            warnings.push("state.audit_depth is 0: no audit snapshots are kept".to_string());
        }

        let mut ids = HashSet::new();
        for worker in &self.workers {
            if !ids.insert(worker.id.as_str()) {
                warnings.push(format!("Duplicate worker id '{}'", worker.id));
            }
            if worker.roles.is_empty() {
                warnings.push(format!("Worker '{}' has no roles", worker.id));
            }
            for role in &worker.roles {
                if !ROLES.contains(&role.as_str()) {
                    warnings.push(format!(
                        "Worker '{}' declares unknown role '{}'",
                        worker.id, role
                    ));
                }
            }
        }
        if self.workers.is_empty() {
            warnings.push("No [[workers]] configured: every dispatch will fail".to_string());
        } else {
            for role in ROLES {
                if !self.workers.iter().any(|w| w.roles.iter().any(|r| r == role)) {
                    warnings.push(format!("No worker provides role '{}'", role));
                }
            }
        }

        warnings
    }
}

/// The file written by `conductor init` and `conductor config init`.
pub fn template() -> String {
    r#"# conductor configuration. Every value below is the default.

[project]
# name = "my-project"

[run]
max_iterations = 100
loop_budget = 5
max_task_attempts = 3

[scheduler]
readiness_weight = 0.4
priority_weight = 0.3
safety_weight = 0.2
urgency_weight = 0.1
primary_weight = 1.0
secondary_weight = 0.6
tertiary_weight = 0.3

[waves]
max_workers = 4
task_timeout_secs = 300
max_attempts = 2
consensus_min_agreement = 2
reviewers = 3
analysts = 2

[loop_detection]
window_size = 100
repetition_threshold = 3
modification_min_edits = 4
modification_unique_ratio = 0.5

[priority_bands]
production_min = 10
production_max = 80
production_default = 50
tests = 200
docs = 300

[state]
audit_depth = 20
phase_history_depth = 50
error_history_depth = 10
backup_keep = 10

# Each worker reads one JSON request on stdin and prints
# {"success": bool, "result": ..., "error": "..."} on stdout.
#
# [[workers]]
# id = "local"
# endpoint = "./bin/worker"
# args = []
# roles = ["planner", "coder", "reviewer", "analyst", "fixer", "writer"]
# capacity = 2
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_file_gives_defaults() {
        let toml = ConductorToml::parse("").unwrap();
        assert_eq!(toml, ConductorToml::default());
        assert_eq!(toml.run.max_iterations, 100);
        assert_eq!(toml.waves.max_workers, 4);
        assert_eq!(toml.loop_detection.window_size, 100);
        assert_eq!(toml.priority_bands.tests, 200);
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let toml = ConductorToml::parse(&template()).unwrap();
        assert_eq!(toml, ConductorToml::default());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let content = r#"
[waves]
reviewers = 5

[[workers]]
id = "w1"
endpoint = "worker.sh"
roles = ["coder"]
"#;
        let toml = ConductorToml::parse(content).unwrap();
        assert_eq!(toml.waves.reviewers, 5);
        assert_eq!(toml.waves.max_attempts, 2);
        assert_eq!(toml.workers.len(), 1);
        assert_eq!(toml.workers[0].capacity, 1);
        assert!(toml.workers[0].args.is_empty());
    }

    #[test]
    fn test_to_wave_config() {
        let mut toml = ConductorToml::default();
        toml.waves.task_timeout_secs = 30;
        let wave = toml.waves.to_wave_config();
        assert_eq!(wave.task_timeout, Duration::from_secs(30));
        assert_eq!(wave.max_workers, 4);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let err = ConductorToml::parse("[run\nmax_iterations = ").unwrap_err();
        assert!(err.to_string().contains("conductor.toml"));
    }

    #[test]
    fn test_validate_reports_missing_workers() {
        let warnings = ConductorToml::default().validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("No [[workers]]"));
    }

    #[test]
    fn test_validate_reports_roles_and_duplicates() {
        let content = r#"
[waves]
reviewers = 1
consensus_min_agreement = 2

[[workers]]
id = "w1"
endpoint = "a"
roles = ["planner", "coder", "reviewer", "analyst", "fixer", "writer"]

[[workers]]
id = "w1"
endpoint = "b"
roles = ["tester"]
"#;
        let warnings = ConductorToml::parse(content).unwrap().validate();
        assert!(warnings.iter().any(|w| w.contains("Duplicate worker id")));
        assert!(warnings.iter().any(|w| w.contains("unknown role 'tester'")));
        assert!(warnings.iter().any(|w| w.contains("can never agree")));
        assert!(!warnings.iter().any(|w| w.contains("No worker provides")));
    }

    #[test]
    fn test_load_or_default_and_save() {
        let dir = tempdir().unwrap();
        let loaded = ConductorToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, ConductorToml::default());

        let mut toml = ConductorToml::default();
        toml.project.name = Some("demo".to_string());
        toml.run.loop_budget = 9;
        toml.save(&dir.path().join("conductor.toml")).unwrap();

        let reloaded = ConductorToml::load_or_default(dir.path()).unwrap();
        assert_eq!(reloaded.project.name.as_deref(), Some("demo"));
        assert_eq!(reloaded.run.loop_budget, 9);
    }
}
