//! Strategic objective selection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::ObjectiveMetrics;
use super::profile::calculate_profile;
use crate::state::{Objective, ObjectiveId, PipelineState, PriorityTier, Task};

fn default_readiness_weight() -> f64 {
    0.4
}

fn default_priority_weight() -> f64 {
    0.3
}

fn default_safety_weight() -> f64 {
    0.2
}

fn default_urgency_weight() -> f64 {
    0.1
}

fn default_primary() -> f64 {
    1.0
}

fn default_secondary() -> f64 {
    0.6
}

fn default_tertiary() -> f64 {
    0.3
}

/// `[scheduler]` in `conductor.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_readiness_weight")]
    pub readiness_weight: f64,
    #[serde(default = "default_priority_weight")]
    pub priority_weight: f64,
    /// Weight of `1 - risk`.
    #[serde(default = "default_safety_weight")]
    pub safety_weight: f64,
    /// Weight of the temporal dimension.
    #[serde(default = "default_urgency_weight")]
    pub urgency_weight: f64,
    #[serde(default = "default_primary")]
    pub primary_weight: f64,
    #[serde(default = "default_secondary")]
    pub secondary_weight: f64,
    #[serde(default = "default_tertiary")]
    pub tertiary_weight: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            readiness_weight: default_readiness_weight(),
            priority_weight: default_priority_weight(),
            safety_weight: default_safety_weight(),
            urgency_weight: default_urgency_weight(),
            primary_weight: default_primary(),
            secondary_weight: default_secondary(),
            tertiary_weight: default_tertiary(),
        }
    }
}

impl SchedulerConfig {
    pub fn tier_weight(&self, tier: PriorityTier) -> f64 {
        match tier {
            PriorityTier::Primary => self.primary_weight,
            PriorityTier::Secondary => self.secondary_weight,
            PriorityTier::Tertiary => self.tertiary_weight,
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let sum =
            self.readiness_weight + self.priority_weight + self.safety_weight + self.urgency_weight;
        if (sum - 1.0).abs() > 1e-6 {
            warnings.push(format!("scheduler score weights sum to {:.3}, not 1.0", sum));
        }
        let all = [
            self.readiness_weight,
            self.priority_weight,
            self.safety_weight,
            self.urgency_weight,
            self.primary_weight,
            self.secondary_weight,
            self.tertiary_weight,
        ];
        if all.iter().any(|w| *w < 0.0) {
            warnings.push("scheduler weights must not be negative".to_string());
        }
        warnings
    }
}

/// The chosen objective and the numbers behind the choice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub objective_id: ObjectiveId,
    pub score: f64,
    pub readiness: f64,
    pub risk: f64,
    pub temporal: f64,
    pub tier_weight: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectiveScheduler {
    config: SchedulerConfig,
}

impl ObjectiveScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Approved or active, with every dependency completed.
    pub fn is_eligible(state: &PipelineState, objective: &Objective) -> bool {
        objective.status.is_schedulable() && state.dependencies_met(objective)
    }

    /// Score one objective as of `as_of`. Readiness is zero while any dependency is
    /// unmet.
    pub fn score(&self, state: &PipelineState, objective: &Objective, as_of: DateTime<Utc>) -> Selection {
        let tasks: Vec<&Task> = objective
            .tasks
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .collect();
        let profile = calculate_profile(objective, &tasks, as_of);
        let metrics = ObjectiveMetrics::from_profile(&profile, objective.completion_percentage);
        let readiness = if state.dependencies_met(objective) {
            metrics.readiness
        } else {
            0.0
        };
        let tier_weight = self.config.tier_weight(objective.tier);
        let score = self.config.readiness_weight * readiness
            + self.config.priority_weight * tier_weight
            + self.config.safety_weight * (1.0 - metrics.risk)
            + self.config.urgency_weight * profile.temporal;
        Selection {
            objective_id: objective.id,
            score,
            readiness,
            risk: metrics.risk,
            temporal: profile.temporal,
            tier_weight,
        }
    }

    /// Every eligible objective, best first; ties keep the lower id first.
    pub fn rank(&self, state: &PipelineState, as_of: DateTime<Utc>) -> Vec<Selection> {
        let mut ranked: Vec<Selection> = state
            .objectives
            .values()
            .filter(|o| Self::is_eligible(state, o))
            .map(|o| self.score(state, o, as_of))
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.objective_id.cmp(&b.objective_id))
        });
        ranked
    }

    /// Best eligible objective, or `None` when nothing is eligible. An eligible
    /// active objective stays selected until it completes or blocks.
    pub fn select_next(&self, state: &PipelineState, as_of: DateTime<Utc>) -> Option<Selection> {
        let active = state
            .active_objective()
            .and_then(|id| state.objectives.get(&id))
            .filter(|o| Self::is_eligible(state, o));
        let selection = match active {
            Some(objective) => Some(self.score(state, objective, as_of)),
            None => self.rank(state, as_of).into_iter().next(),
        };
        match &selection {
            Some(s) => tracing::debug!(
                objective = %s.objective_id,
                score = s.score,
                readiness = s.readiness,
                risk = s.risk,
                "Selected objective"
            ),
            None => tracing::debug!("No eligible objective"),
        }
        selection
    }
}
