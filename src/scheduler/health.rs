//! Read-only health assessments of objectives.

use serde::Serialize;

use crate::state::{Objective, ObjectiveId, PipelineState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcernLevel {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    AttentionNeeded,
    Degrading,
    Critical,
}

impl std::fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OverallHealth::Healthy => "healthy",
            OverallHealth::AttentionNeeded => "attention_needed",
            OverallHealth::Degrading => "degrading",
            OverallHealth::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Concern {
    pub dimension: &'static str,
    pub value: f64,
    pub level: ConcernLevel,
    pub message: String,
    pub recommendation: String,
}

/// Per-dimension analysis of one objective's profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub objective_id: ObjectiveId,
    pub overall: OverallHealth,
    pub concerns: Vec<Concern>,
    pub complexity_score: f64,
    pub risk_score: f64,
    pub readiness_score: f64,
}

impl HealthReport {
    pub fn count(&self, level: ConcernLevel) -> usize {
        self.concerns.iter().filter(|c| c.level == level).count()
    }
}

pub fn analyze_health(objective: &Objective) -> HealthReport {
    let mut concerns = Vec::new();
    for (dimension, value) in objective.profile.dimensions() {
        match dimension {
            "error" | "temporal" if value > 0.7 => {
                let recommendation = if dimension == "error" {
                    "Address critical issues immediately"
                } else {
                    "Prioritize this objective due to time constraints"
                };
                concerns.push(Concern {
                    dimension,
                    value,
                    level: ConcernLevel::High,
                    message: format!("High {} dimension ({:.2})", dimension, value),
                    recommendation: recommendation.to_string(),
                });
            }
            "functional" | "integration" if value > 0.8 => {
                concerns.push(Concern {
                    dimension,
                    value,
                    level: ConcernLevel::Medium,
                    message: format!("Very high {} complexity ({:.2})", dimension, value),
                    recommendation: format!("Consider breaking down {} requirements", dimension),
                });
            }
            _ => {}
        }
    }

    let high = concerns.iter().filter(|c| c.level == ConcernLevel::High).count();
    let medium = concerns.len() - high;
    let overall = if high >= 2 {
        OverallHealth::Critical
    } else if high >= 1 || medium >= 3 {
        OverallHealth::Degrading
    } else if medium >= 1 {
        OverallHealth::AttentionNeeded
    } else {
        OverallHealth::Healthy
    };

    HealthReport {
        objective_id: objective.id,
        overall,
        concerns,
        complexity_score: objective.complexity_score,
        risk_score: objective.risk_score,
        readiness_score: objective.readiness_score,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveHealthStatus {
    Healthy,
    Degrading,
    Critical,
    Blocked,
}

impl std::fmt::Display for ObjectiveHealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObjectiveHealthStatus::Healthy => "healthy",
            ObjectiveHealthStatus::Degrading => "degrading",
            ObjectiveHealthStatus::Critical => "critical",
            ObjectiveHealthStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Execution health: dependencies, open critical issues, and outcome history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectiveHealth {
    pub status: ObjectiveHealthStatus,
    pub success_rate: Option<f64>,
    pub consecutive_failures: u32,
    pub blocking_dependencies: Vec<ObjectiveId>,
    pub recommendation: String,
}

pub fn objective_health(state: &PipelineState, objective: &Objective) -> ObjectiveHealth {
    let blocking = state.unmet_dependencies(objective);
    let success_rate = objective.success_rate();
    let attempts = objective.success_count + objective.failure_count;

    let (status, recommendation) = if !blocking.is_empty() {
        let ids: Vec<String> = blocking.iter().map(ToString::to_string).collect();
        (
            ObjectiveHealthStatus::Blocked,
            format!("Blocked by dependencies: {}", ids.join(", ")),
        )
    } else if objective.critical_issues > 0 {
        (
            ObjectiveHealthStatus::Critical,
            format!(
                "Critical issues blocking progress: {} issues",
                objective.critical_issues
            ),
        )
    } else if objective.consecutive_failures >= 3 {
        (
            ObjectiveHealthStatus::Critical,
            format!(
                "Multiple consecutive failures: {}",
                objective.consecutive_failures
            ),
        )
    } else if attempts >= 2 && success_rate.is_some_and(|r| r < 0.5) {
        (
            ObjectiveHealthStatus::Degrading,
            format!(
                "Success rate degrading: {:.1}%",
                success_rate.unwrap_or_default() * 100.0
            ),
        )
    } else {
        (
            ObjectiveHealthStatus::Healthy,
            "Objective progressing normally".to_string(),
        )
    };

    ObjectiveHealth {
        status,
        success_rate,
        consecutive_failures: objective.consecutive_failures,
        blocking_dependencies: blocking,
        recommendation,
    }
}
