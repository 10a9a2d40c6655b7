//! Execution phases and the table that picks the next one.
//!
//! `next_phase` is a pure lookup over (focus task status × objective presence).
//! It never consults a worker, so the whole decision surface is testable offline.

use serde::{Deserialize, Serialize};

use crate::state::TaskStatus;

/// The closed set of phases the execution loop can run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Planning,
    Coding,
    Qa,
    Debugging,
    Documentation,
    ProjectPlanning,
    Complete,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Planning,
        Phase::Coding,
        Phase::Qa,
        Phase::Debugging,
        Phase::Documentation,
        Phase::ProjectPlanning,
        Phase::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Coding => "coding",
            Phase::Qa => "qa",
            Phase::Debugging => "debugging",
            Phase::Documentation => "documentation",
            Phase::ProjectPlanning => "project_planning",
            Phase::Complete => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete)
    }

    /// The phase to switch to when this one is caught repeating itself.
    pub fn remediation(&self) -> Phase {
        match self {
            Phase::Coding | Phase::Qa => Phase::Debugging,
            Phase::Debugging => Phase::Planning,
            Phase::Planning => Phase::Documentation,
            Phase::Documentation => Phase::ProjectPlanning,
            Phase::ProjectPlanning => Phase::Planning,
            Phase::Complete => Phase::Complete,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace('-', "_");
        Phase::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid phase '{}'. Valid values: planning, coding, qa, debugging, documentation, project_planning, complete",
                    s
                )
            })
    }
}

/// Whether objectives exist and whether any remain unfinished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectivePresence {
    /// No objectives in the state.
    Absent,
    /// At least one objective is not completed.
    Incomplete,
    /// Every objective is completed.
    Complete,
}

/// Pick the next phase from the focus task status and the objective presence.
///
/// `focus` is the status of the most urgent open task, `Some(Completed)` when every
/// task is done, and `None` when there are no tasks at all.
pub fn next_phase(focus: Option<TaskStatus>, objectives: ObjectivePresence) -> Phase {
    use ObjectivePresence::*;

    match (focus, objectives) {
        (Some(TaskStatus::NeedsFix), _) => Phase::Debugging,
        (Some(TaskStatus::QaPending), _) => Phase::Qa,
        (Some(TaskStatus::Pending | TaskStatus::InProgress), _) => Phase::Coding,
        (Some(TaskStatus::Failed), _) => Phase::Debugging,
        (Some(TaskStatus::Completed), Incomplete) => Phase::Documentation,
        (Some(TaskStatus::Completed), Absent | Complete) => Phase::Complete,
        (None, Absent | Incomplete) => Phase::Planning,
        (None, Complete) => Phase::Complete,
    }
}
