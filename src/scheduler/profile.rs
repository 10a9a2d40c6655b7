//! Seven-dimension profile of an objective.
//!
//! Every dimension is a scalar in `[0, 1]` derived from counts over the objective
//! and its tasks. The calculation is pure: the current time is an argument.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::state::{Objective, ObjectiveStatus, Task};

/// Source or data file extensions that count as artifact references.
static ARTIFACT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(rs|py|js|jsx|ts|tsx|go|java|c|h|cpp|hpp|rb|sql|json|toml|ya?ml|csv|proto)\b")
        .unwrap()
});

const STATE_KEYWORDS: &[&str] = &[
    "state", "session", "cache", "store", "persist", "memory", "context",
];
const RISK_KEYWORDS: &[&str] = &[
    "error", "exception", "fail", "bug", "issue", "risk", "critical",
];
const CONTEXT_KEYWORDS: &[&str] = &[
    "context",
    "environment",
    "configuration",
    "setup",
    "prerequisite",
];
const INTEGRATION_KEYWORDS: &[&str] = &[
    "integrate",
    "connect",
    "interface",
    "api",
    "service",
    "component",
];

pub const DIMENSIONS: [&str; 7] = [
    "temporal",
    "functional",
    "data",
    "state",
    "error",
    "context",
    "integration",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionalProfile {
    pub temporal: f64,
    pub functional: f64,
    pub data: f64,
    pub state: f64,
    pub error: f64,
    pub context: f64,
    pub integration: f64,
}

impl Default for DimensionalProfile {
    /// The neutral midpoint of the space.
    fn default() -> Self {
        Self::from_array([0.5; 7])
    }
}

impl DimensionalProfile {
    pub fn zero() -> Self {
        Self::from_array([0.0; 7])
    }

    pub fn from_array(v: [f64; 7]) -> Self {
        Self {
            temporal: v[0],
            functional: v[1],
            data: v[2],
            state: v[3],
            error: v[4],
            context: v[5],
            integration: v[6],
        }
    }

    /// Values in `DIMENSIONS` order.
    pub fn as_array(&self) -> [f64; 7] {
        [
            self.temporal,
            self.functional,
            self.data,
            self.state,
            self.error,
            self.context,
            self.integration,
        ]
    }

    /// `(name, value)` pairs in `DIMENSIONS` order.
    pub fn dimensions(&self) -> impl Iterator<Item = (&'static str, f64)> {
        DIMENSIONS.into_iter().zip(self.as_array())
    }

    /// Per-dimension `self - previous`.
    pub fn delta(&self, previous: &DimensionalProfile) -> DimensionalProfile {
        let a = self.as_array();
        let b = previous.as_array();
        Self::from_array(std::array::from_fn(|i| a[i] - b[i]))
    }
}

fn ratio(count: usize, scale: f64) -> f64 {
    (count as f64 / scale).min(1.0)
}

/// Number of distinct keywords that appear anywhere in `text` (already lowercased).
fn keyword_hits(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| text.contains(*k)).count()
}

fn temporal(objective: &Objective, as_of: DateTime<Utc>) -> f64 {
    let base = match objective.target_date {
        Some(target) => {
            let days = (target - as_of).num_days();
            if days < 7 {
                0.9
            } else if days < 30 {
                0.7
            } else if days < 90 {
                0.5
            } else {
                0.3
            }
        }
        None => 0.5,
    };
    if objective.status == ObjectiveStatus::Approved {
        (base + 0.2_f64).min(1.0)
    } else {
        base
    }
}

/// Compute the profile of `objective` given its tasks, as seen at `as_of`.
pub fn calculate_profile(
    objective: &Objective,
    tasks: &[&Task],
    as_of: DateTime<Utc>,
) -> DimensionalProfile {
    let mut text = format!("{}\n{}", objective.title, objective.description);
    for task in tasks {
        text.push('\n');
        text.push_str(&task.description);
    }
    let text = text.to_lowercase();

    let deps = objective.depends_on.len();
    let artifact_refs = tasks
        .iter()
        .filter(|t| ARTIFACT_REGEX.is_match(&t.description) || ARTIFACT_REGEX.is_match(&t.target))
        .count();

    let functional = 0.6 * ratio(tasks.len(), 20.0)
        + 0.4 * ratio(objective.description.chars().count(), 1000.0);
    let data = 0.6 * ratio(deps, 5.0) + 0.4 * ratio(artifact_refs, 10.0);
    let state = ratio(keyword_hits(&text, STATE_KEYWORDS), 5.0);
    let error = 0.6 * ratio(objective.critical_issues as usize, 5.0)
        + 0.4 * ratio(keyword_hits(&text, RISK_KEYWORDS), 5.0);
    let context = 0.5 * ratio(objective.acceptance_criteria.len(), 10.0)
        + 0.5 * ratio(keyword_hits(&text, CONTEXT_KEYWORDS), 5.0);
    let integration =
        0.5 * ratio(deps, 5.0) + 0.5 * ratio(keyword_hits(&text, INTEGRATION_KEYWORDS), 5.0);

    DimensionalProfile {
        temporal: temporal(objective, as_of),
        functional,
        data,
        state,
        error,
        context,
        integration,
    }
}
