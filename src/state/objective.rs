//! High-level units of work and their lifecycle.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::arena::ArenaItem;
use super::task::{Task, TaskId, TaskStatus};
use crate::errors::TransitionError;
use crate::scheduler::metrics::ObjectiveMetrics;
use crate::scheduler::profile::{DimensionalProfile, calculate_profile};

/// Arena key for objectives.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ObjectiveId(pub u32);

impl std::fmt::Display for ObjectiveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "O{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    #[default]
    Proposed,
    Approved,
    Active,
    Completed,
    Blocked,
}

impl ObjectiveStatus {
    /// Position along the forward lifecycle. `Blocked` sits outside it.
    fn rank(&self) -> Option<u8> {
        match self {
            ObjectiveStatus::Proposed => Some(0),
            ObjectiveStatus::Approved => Some(1),
            ObjectiveStatus::Active => Some(2),
            ObjectiveStatus::Completed => Some(3),
            ObjectiveStatus::Blocked => None,
        }
    }

    /// Objectives the scheduler may pick.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, ObjectiveStatus::Approved | ObjectiveStatus::Active)
    }
}

impl std::fmt::Display for ObjectiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObjectiveStatus::Proposed => "proposed",
            ObjectiveStatus::Approved => "approved",
            ObjectiveStatus::Active => "active",
            ObjectiveStatus::Completed => "completed",
            ObjectiveStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ObjectiveStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "proposed" => Ok(ObjectiveStatus::Proposed),
            "approved" => Ok(ObjectiveStatus::Approved),
            "active" => Ok(ObjectiveStatus::Active),
            "completed" => Ok(ObjectiveStatus::Completed),
            "blocked" => Ok(ObjectiveStatus::Blocked),
            _ => anyhow::bail!(
                "Invalid objective status '{}'. Valid values: proposed, approved, active, completed, blocked",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    Primary,
    #[default]
    Secondary,
    Tertiary,
}

impl std::fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PriorityTier::Primary => "primary",
            PriorityTier::Secondary => "secondary",
            PriorityTier::Tertiary => "tertiary",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PriorityTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(PriorityTier::Primary),
            "secondary" => Ok(PriorityTier::Secondary),
            "tertiary" => Ok(PriorityTier::Tertiary),
            _ => anyhow::bail!(
                "Invalid priority tier '{}'. Valid values: primary, secondary, tertiary",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub id: ObjectiveId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ObjectiveStatus,
    #[serde(default)]
    pub tier: PriorityTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub depends_on: BTreeSet<ObjectiveId>,
    /// Ordered task ids; the tasks themselves live in the state arena.
    #[serde(default)]
    pub tasks: Vec<TaskId>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub critical_issues: u32,
    #[serde(default)]
    pub profile: DimensionalProfile,
    /// Per-dimension delta between the last two profile snapshots.
    #[serde(default = "DimensionalProfile::zero")]
    pub velocity: DimensionalProfile,
    #[serde(default)]
    pub complexity_score: f64,
    #[serde(default)]
    pub risk_score: f64,
    #[serde(default)]
    pub readiness_score: f64,
    #[serde(default)]
    pub completion_percentage: f64,
    #[serde(default)]
    pub documented: bool,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArenaItem for Objective {
    type Id = ObjectiveId;

    fn arena_id(&self) -> ObjectiveId {
        self.id
    }
}

impl Objective {
    pub fn new(id: ObjectiveId, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.into(),
            description: String::new(),
            status: ObjectiveStatus::Proposed,
            tier: PriorityTier::Secondary,
            target_date: None,
            depends_on: BTreeSet::new(),
            tasks: Vec::new(),
            acceptance_criteria: Vec::new(),
            critical_issues: 0,
            profile: DimensionalProfile::default(),
            velocity: DimensionalProfile::zero(),
            complexity_score: 0.0,
            risk_score: 0.0,
            readiness_score: 0.0,
            completion_percentage: 0.0,
            documented: false,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tier(mut self, tier: PriorityTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_status(mut self, status: ObjectiveStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = ObjectiveId>) -> Self {
        self.depends_on.extend(deps);
        self
    }

    pub fn with_target_date(mut self, date: DateTime<Utc>) -> Self {
        self.target_date = Some(date);
        self
    }

    /// Move along the lifecycle.
    ///
    /// Forward moves (proposed → approved → active → completed) and moves into
    /// `Blocked` from any unfinished status are allowed. `Blocked → Approved` is the
    /// unblock path. Everything else is rejected.
    pub fn transition(
        &mut self,
        to: ObjectiveStatus,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status == to {
            return Ok(());
        }
        let allowed = match (self.status.rank(), to.rank()) {
            (Some(from), Some(target)) => target > from,
            (Some(_), None) => self.status != ObjectiveStatus::Completed,
            (None, _) => to == ObjectiveStatus::Approved,
        };
        if !allowed {
            return Err(TransitionError::Backwards {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// External override that skips lifecycle checks.
    pub fn force_status(&mut self, to: ObjectiveStatus, now: DateTime<Utc>) {
        self.status = to;
        self.updated_at = now;
    }

    /// Recompute completion, profile, velocity, and derived scores.
    ///
    /// Status is left untouched: an `active` objective stays `active` regardless of
    /// what the recomputed numbers say.
    pub fn update_progress(&mut self, tasks: &[&Task], as_of: DateTime<Utc>) {
        let completed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        self.completion_percentage = if tasks.is_empty() {
            0.0
        } else {
            completed as f64 / tasks.len() as f64 * 100.0
        };

        let profile = calculate_profile(self, tasks, as_of);
        self.velocity = profile.delta(&self.profile);
        self.profile = profile;

        let metrics = ObjectiveMetrics::from_profile(&self.profile, self.completion_percentage);
        self.complexity_score = metrics.complexity;
        self.risk_score = metrics.risk;
        self.readiness_score = metrics.readiness;
        self.updated_at = as_of;
    }

    /// Count one phase outcome attributed to this objective.
    pub fn record_outcome(&mut self, success: bool) {
        if success {
            self.success_count += 1;
            self.consecutive_failures = 0;
        } else {
            self.failure_count += 1;
            self.consecutive_failures += 1;
        }
    }

    pub fn success_rate(&self) -> Option<f64> {
        let total = self.success_count + self.failure_count;
        (total > 0).then(|| self.success_count as f64 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objective(status: ObjectiveStatus) -> Objective {
        Objective::new(ObjectiveId(1), "Persistence layer", Utc::now()).with_status(status)
    }

    #[test]
    fn test_forward_transitions_allowed() {
        let now = Utc::now();
        let mut o = objective(ObjectiveStatus::Proposed);
        o.transition(ObjectiveStatus::Approved, now).unwrap();
        o.transition(ObjectiveStatus::Active, now).unwrap();
        o.transition(ObjectiveStatus::Completed, now).unwrap();
        assert_eq!(o.status, ObjectiveStatus::Completed);
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut o = objective(ObjectiveStatus::Active);
        let err = o
            .transition(ObjectiveStatus::Approved, Utc::now())
            .unwrap_err();
        assert!(matches!(err, TransitionError::Backwards { .. }));
        assert_eq!(o.status, ObjectiveStatus::Active);
    }

    #[test]
    fn test_block_and_unblock() {
        let now = Utc::now();
        let mut o = objective(ObjectiveStatus::Active);
        o.transition(ObjectiveStatus::Blocked, now).unwrap();
        assert!(o.transition(ObjectiveStatus::Active, now).is_err());
        o.transition(ObjectiveStatus::Approved, now).unwrap();
        assert_eq!(o.status, ObjectiveStatus::Approved);
    }

    #[test]
    fn test_completed_cannot_be_blocked() {
        let mut o = objective(ObjectiveStatus::Completed);
        assert!(o.transition(ObjectiveStatus::Blocked, Utc::now()).is_err());
    }

    #[test]
    fn test_force_status_overrides() {
        let mut o = objective(ObjectiveStatus::Completed);
        o.force_status(ObjectiveStatus::Approved, Utc::now());
        assert_eq!(o.status, ObjectiveStatus::Approved);
    }

    #[test]
    fn test_update_progress_keeps_active_status_at_zero_completion() {
        let now = Utc::now();
        let mut o = objective(ObjectiveStatus::Active);
        let task = Task::new(TaskId(1), "Write store", "src/store.rs", 50, now);
        o.tasks.push(task.id);

        o.update_progress(&[&task], now);

        assert_eq!(o.completion_percentage, 0.0);
        assert_eq!(o.status, ObjectiveStatus::Active);
    }

    #[test]
    fn test_update_progress_computes_completion_and_velocity() {
        let now = Utc::now();
        let mut o = objective(ObjectiveStatus::Approved);
        let mut done = Task::new(TaskId(1), "a", "a.rs", 50, now);
        done.status = TaskStatus::Completed;
        let open = Task::new(TaskId(2), "b", "b.rs", 50, now);

        o.update_progress(&[&done, &open], now);
        assert_eq!(o.completion_percentage, 50.0);
        let first = o.profile;

        o.acceptance_criteria = (0..10).map(|i| format!("criterion {}", i)).collect();
        o.update_progress(&[&done, &open], now);
        assert!(o.profile.context > first.context);
        assert!((o.velocity.context - (o.profile.context - first.context)).abs() < 1e-12);
    }

    #[test]
    fn test_record_outcome_tracks_consecutive_failures() {
        let mut o = objective(ObjectiveStatus::Active);
        o.record_outcome(false);
        o.record_outcome(false);
        assert_eq!(o.consecutive_failures, 2);
        o.record_outcome(true);
        assert_eq!(o.consecutive_failures, 0);
        assert_eq!(o.success_rate(), Some(1.0 / 3.0));
    }
}
