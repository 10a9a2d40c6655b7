use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fingerprint::Fingerprint;

fn default_window_size() -> usize {
    100
}

fn default_repetition_threshold() -> usize {
    3
}

fn default_modification_min_edits() -> usize {
    4
}

fn default_modification_unique_ratio() -> f64 {
    0.5
}

/// `[loop_detection]` in `conductor.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_repetition_threshold")]
    pub repetition_threshold: usize,
    #[serde(default = "default_modification_min_edits")]
    pub modification_min_edits: usize,
    #[serde(default = "default_modification_unique_ratio")]
    pub modification_unique_ratio: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            repetition_threshold: default_repetition_threshold(),
            modification_min_edits: default_modification_min_edits(),
            modification_unique_ratio: default_modification_unique_ratio(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    ExactRepetition,
    StateCycle,
    ModificationLoop,
}

impl std::fmt::Display for LoopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopKind::ExactRepetition => "exact_repetition",
            LoopKind::StateCycle => "state_cycle",
            LoopKind::ModificationLoop => "modification_loop",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_loop_length(length: usize) -> Self {
        match length {
            10.. => Severity::Critical,
            7..=9 => Severity::High,
            5..=6 => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopEntry {
    pub action: Fingerprint,
    pub state: Fingerprint,
    pub target: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The action about to be taken.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub action: Fingerprint,
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopVerdict {
    pub detected: bool,
    pub kind: Option<LoopKind>,
    pub loop_length: usize,
    pub confidence: f64,
    pub severity: Severity,
    pub suggested_break: String,
}

impl LoopVerdict {
    pub fn clear() -> Self {
        Self {
            detected: false,
            kind: None,
            loop_length: 0,
            confidence: 0.0,
            severity: Severity::Low,
            suggested_break: String::new(),
        }
    }

    fn found(kind: LoopKind, loop_length: usize, confidence: f64, suggested_break: String) -> Self {
        Self {
            detected: true,
            kind: Some(kind),
            loop_length,
            confidence: confidence.clamp(0.0, 1.0),
            severity: Severity::from_loop_length(loop_length),
            suggested_break,
        }
    }
}

/// Intervene on any critical verdict, or on two or more high ones.
pub fn should_intervene(verdicts: &[LoopVerdict]) -> bool {
    let detected = verdicts.iter().filter(|v| v.detected);
    let (critical, high) = detected.fold((0, 0), |(c, h), v| match v.severity {
        Severity::Critical => (c + 1, h),
        Severity::High => (c, h + 1),
        _ => (c, h),
    });
    critical > 0 || high >= 2
}

/// Bounded window of recent (action, resulting state) pairs.
#[derive(Debug, Clone)]
pub struct LoopDetector {
    config: LoopConfig,
    window: VecDeque<LoopEntry>,
}

impl LoopDetector {
    pub fn new(config: LoopConfig) -> Self {
        let capacity = config.window_size.max(1);
        Self {
            config,
            window: VecDeque::with_capacity(capacity),
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LoopEntry> {
        self.window.iter()
    }

    pub fn record(&mut self, action: Fingerprint, state: Fingerprint, target: Option<String>) {
        self.record_at(action, state, target, Utc::now());
    }

    pub fn record_at(
        &mut self,
        action: Fingerprint,
        state: Fingerprint,
        target: Option<String>,
        timestamp: DateTime<Utc>,
    ) {
        if self.window.len() >= self.config.window_size.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(LoopEntry {
            action,
            state,
            target,
            timestamp,
        });
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Check the window against `candidate`. Reads only.
    pub fn detect(&self, candidate: &Candidate) -> LoopVerdict {
        self.exact_repetition(candidate)
            .or_else(|| self.state_cycle())
            .or_else(|| self.modification_loop(candidate))
            .unwrap_or_else(LoopVerdict::clear)
    }

    fn exact_repetition(&self, candidate: &Candidate) -> Option<LoopVerdict> {
        let threshold = self.config.repetition_threshold.max(1);
        let run = self
            .window
            .iter()
            .rev()
            .take_while(|e| e.action == candidate.action)
            .count();
        (run >= threshold).then(|| {
            LoopVerdict::found(
                LoopKind::ExactRepetition,
                run,
                (run as f64 / (2 * threshold) as f64).max(0.5),
                format!(
                    "Same action repeated {} times in a row; switch to a different phase or approach",
                    run
                ),
            )
        })
    }

    fn state_cycle(&self) -> Option<LoopVerdict> {
        let states: Vec<&Fingerprint> = self.window.iter().map(|e| &e.state).collect();
        let len = states.len();
        (2..=len / 2).find_map(|p| {
            let repeated = states[len - 2 * p..len - p] == states[len - p..];
            repeated.then(|| {
                LoopVerdict::found(
                    LoopKind::StateCycle,
                    2 * p,
                    0.8,
                    format!(
                        "State cycles through the same {} states; change strategy or escalate",
                        p
                    ),
                )
            })
        })
    }

    fn modification_loop(&self, candidate: &Candidate) -> Option<LoopVerdict> {
        let target = candidate.target.as_deref()?;
        let edits: Vec<&LoopEntry> = self
            .window
            .iter()
            .filter(|e| e.target.as_deref() == Some(target))
            .collect();
        if edits.len() < self.config.modification_min_edits.max(1) {
            return None;
        }
        let unique: HashSet<&Fingerprint> = edits.iter().map(|e| &e.action).collect();
        let ratio = unique.len() as f64 / edits.len() as f64;
        (ratio < self.config.modification_unique_ratio).then(|| {
            LoopVerdict::found(
                LoopKind::ModificationLoop,
                edits.len(),
                1.0 - ratio,
                format!(
                    "{} modified {} times with few distinct actions; diagnose before editing again",
                    target,
                    edits.len()
                ),
            )
        })
    }
}
