use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::phase::Phase;
use crate::state::{ObjectiveId, PipelineState, TaskId};

/// Truncated SHA-256 of a value's canonical JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub const LEN: usize = 16;

    /// Hash `value`. `serde_json` maps keep keys sorted, so equal values always
    /// produce equal fingerprints.
    pub fn of<T: Serialize>(value: &T) -> Self {
        let canonical = serde_json::to_vec(&serde_json::to_value(value).unwrap_or_default())
            .unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Self(hex[..Self::LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the loop is about to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Action {
    pub phase: Phase,
    pub task_id: Option<TaskId>,
    pub objective_id: Option<ObjectiveId>,
}

impl Action {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

#[derive(Serialize)]
struct StateDigest<'a> {
    phase: Phase,
    objectives: Vec<(ObjectiveId, String)>,
    tasks: Vec<(TaskId, String, u32, Option<&'a str>)>,
}

/// Fingerprint of the progress-relevant parts of the state. The iteration counter,
/// timestamps, and history are left out so that an iteration that changes nothing
/// yields the same fingerprint as the one before it.
pub fn state_fingerprint(state: &PipelineState) -> Fingerprint {
    let digest = StateDigest {
        phase: state.phase,
        objectives: state
            .objectives
            .values()
            .map(|o| (o.id, o.status.to_string()))
            .collect(),
        tasks: state
            .tasks
            .values()
            .map(|t| {
                (
                    t.id,
                    t.status.to_string(),
                    t.attempts,
                    t.errors.back().map(|e| e.message.as_str()),
                )
            })
            .collect(),
    };
    Fingerprint::of(&digest)
}
