//! Combining the outputs of a plan into one answer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::plan::WorkerTask;
use crate::loop_detect::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Strategy {
    MergeAll,
    FirstSuccess,
    Consensus { min_agreement: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Synthesis {
    /// Every successful output keyed by task id.
    Merged { outputs: Map<String, Value> },
    First { task: String, value: Value },
    Agreed { value: Value, votes: usize, total: usize },
    /// Sizes of each group of identical outputs, largest first.
    Disagreement { groups: Vec<usize> },
    NoSuccess,
}

impl Synthesis {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Synthesis::First { value, .. } | Synthesis::Agreed { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Synthesize the successful results in `tasks`, taken in plan order.
pub fn synthesize(tasks: &[WorkerTask], strategy: Strategy) -> Synthesis {
    let outputs: Vec<(&str, Value)> = tasks
        .iter()
        .filter(|t| t.succeeded())
        .filter_map(|t| Some((t.id.as_str(), t.result.clone()?)))
        .collect();
    combine(outputs, strategy)
}

/// Like `synthesize`, but compares only `field` of each result. Results missing
/// the field count as `null`.
pub fn synthesize_field(tasks: &[WorkerTask], field: &str, strategy: Strategy) -> Synthesis {
    let outputs: Vec<(&str, Value)> = tasks
        .iter()
        .filter(|t| t.succeeded())
        .filter_map(|t| {
            let result = t.result.as_ref()?;
            Some((t.id.as_str(), result.get(field).cloned().unwrap_or(Value::Null)))
        })
        .collect();
    combine(outputs, strategy)
}

fn combine(outputs: Vec<(&str, Value)>, strategy: Strategy) -> Synthesis {
    if outputs.is_empty() {
        return Synthesis::NoSuccess;
    }
    match strategy {
        Strategy::MergeAll => Synthesis::Merged {
            outputs: outputs
                .into_iter()
                .map(|(id, value)| (id.to_string(), value))
                .collect(),
        },
        Strategy::FirstSuccess => match outputs.into_iter().next() {
            Some((task, value)) => Synthesis::First {
                task: task.to_string(),
                value,
            },
            None => Synthesis::NoSuccess,
        },
        Strategy::Consensus { min_agreement } => consensus(outputs, min_agreement),
    }
}

fn consensus(outputs: Vec<(&str, Value)>, min_agreement: usize) -> Synthesis {
    let total = outputs.len();
    // Groups in first-seen order so that ties favour the earliest.
    let mut groups: Vec<(Fingerprint, Value, usize)> = Vec::new();
    for (_, value) in outputs {
        let fp = Fingerprint::of(&value);
        match groups.iter_mut().find(|(g, _, _)| *g == fp) {
            Some((_, _, count)) => *count += 1,
            None => groups.push((fp, value, 1)),
        }
    }

    let best = groups
        .iter()
        .enumerate()
        .max_by(|(ia, (_, _, a)), (ib, (_, _, b))| a.cmp(b).then(ib.cmp(ia)))
        .map(|(i, _)| i);

    match best {
        Some(i) if groups[i].2 >= min_agreement.max(1) => {
            let (_, value, votes) = groups.swap_remove(i);
            Synthesis::Agreed {
                value,
                votes,
                total,
            }
        }
        _ => {
            let mut sizes: Vec<usize> = groups.iter().map(|(_, _, n)| *n).collect();
            sizes.sort_unstable_by(|a, b| b.cmp(a));
            tracing::warn!(?sizes, min_agreement, "Workers did not reach consensus");
            Synthesis::Disagreement { groups: sizes }
        }
    }
}
