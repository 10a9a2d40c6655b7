use serde::{Deserialize, Serialize};

use super::profile::DimensionalProfile;

/// Scores derived from a profile and the objective's completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveMetrics {
    pub complexity: f64,
    pub risk: f64,
    pub readiness: f64,
}

impl ObjectiveMetrics {
    /// `completion_percentage` is in `[0, 100]`.
    ///
    /// Readiness here ignores dependencies; callers zero it when any dependency is
    /// unmet.
    pub fn from_profile(profile: &DimensionalProfile, completion_percentage: f64) -> Self {
        let complexity = 0.3 * profile.functional
            + 0.2 * profile.data
            + 0.2 * profile.state
            + 0.3 * profile.integration;
        let risk = 0.5 * profile.error + 0.25 * profile.temporal + 0.25 * complexity;
        let completion = (completion_percentage / 100.0).clamp(0.0, 1.0);
        let readiness =
            0.6 * (1.0 - (0.5 * profile.data + 0.5 * profile.context)) + 0.4 * completion;
        Self {
            complexity,
            risk,
            readiness,
        }
    }
}
