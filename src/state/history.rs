//! Bounded phase-execution history and the trend queries built on it.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::objective::ObjectiveId;
use super::task::TaskId;
use crate::phase::Phase;

/// One executed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub iteration: u64,
    pub phase: Phase,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective_id: Option<ObjectiveId>,
    /// Set when the loop detector replaced the phase that was originally chosen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substituted_for: Option<Phase>,
    #[serde(default)]
    pub message: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Ring buffer of phase records, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseHistory {
    records: VecDeque<PhaseRecord>,
}

impl PhaseHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, evicting the oldest beyond `capacity`.
    pub fn push(&mut self, record: PhaseRecord, capacity: usize) {
        self.records.push_back(record);
        while self.records.len() > capacity.max(1) {
            self.records.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &PhaseRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&PhaseRecord> {
        self.records.back()
    }

    fn for_phase(&self, phase: Phase) -> impl DoubleEndedIterator<Item = &PhaseRecord> {
        self.records.iter().filter(move |r| r.phase == phase)
    }

    pub fn consecutive_failures(&self, phase: Phase) -> usize {
        self.for_phase(phase).rev().take_while(|r| !r.success).count()
    }

    pub fn consecutive_successes(&self, phase: Phase) -> usize {
        self.for_phase(phase).rev().take_while(|r| r.success).count()
    }

    /// Success rate over the last `window` runs of `phase`.
    pub fn recent_success_rate(&self, phase: Phase, window: usize) -> Option<f64> {
        let recent: Vec<bool> = self
            .for_phase(phase)
            .rev()
            .take(window)
            .map(|r| r.success)
            .collect();
        if recent.is_empty() {
            return None;
        }
        let ok = recent.iter().filter(|s| **s).count();
        Some(ok as f64 / recent.len() as f64)
    }

    /// Compare the success rate of the newer half of a phase's runs to the older half.
    fn half_rates(&self, phase: Phase) -> Option<(f64, f64)> {
        let outcomes: Vec<bool> = self.for_phase(phase).map(|r| r.success).collect();
        if outcomes.len() < 4 {
            return None;
        }
        let mid = outcomes.len() / 2;
        let rate = |slice: &[bool]| {
            slice.iter().filter(|s| **s).count() as f64 / slice.len() as f64
        };
        Some((rate(&outcomes[..mid]), rate(&outcomes[mid..])))
    }

    pub fn is_improving(&self, phase: Phase) -> bool {
        self.half_rates(phase)
            .is_some_and(|(older, newer)| newer > older)
    }

    pub fn is_degrading(&self, phase: Phase) -> bool {
        self.half_rates(phase)
            .is_some_and(|(older, newer)| newer < older)
    }

    /// Alternating success and failure across the last four runs.
    pub fn is_oscillating(&self, phase: Phase) -> bool {
        let recent: Vec<bool> = self
            .for_phase(phase)
            .rev()
            .take(4)
            .map(|r| r.success)
            .collect();
        recent.len() == 4 && recent.windows(2).all(|w| w[0] != w[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(iteration: u64, phase: Phase, success: bool) -> PhaseRecord {
        PhaseRecord {
            iteration,
            phase,
            success,
            task_id: None,
            objective_id: None,
            substituted_for: None,
            message: String::new(),
            duration_ms: 10,
            timestamp: Utc::now(),
        }
    }

    fn history(outcomes: &[bool]) -> PhaseHistory {
        let mut h = PhaseHistory::new();
        for (i, ok) in outcomes.iter().enumerate() {
            h.push(record(i as u64, Phase::Coding, *ok), 20);
        }
        h
    }

    #[test]
    fn test_push_is_bounded() {
        let mut h = PhaseHistory::new();
        for i in 0..30 {
            h.push(record(i, Phase::Qa, true), 20);
        }
        assert_eq!(h.len(), 20);
        assert_eq!(h.iter().next().unwrap().iteration, 10);
        assert_eq!(h.last().unwrap().iteration, 29);
    }

    #[test]
    fn test_consecutive_counts_per_phase() {
        let mut h = history(&[true, false, false]);
        h.push(record(9, Phase::Qa, true), 20);
        assert_eq!(h.consecutive_failures(Phase::Coding), 2);
        assert_eq!(h.consecutive_successes(Phase::Coding), 0);
        assert_eq!(h.consecutive_successes(Phase::Qa), 1);
        assert_eq!(h.consecutive_failures(Phase::Planning), 0);
    }

    #[test]
    fn test_recent_success_rate() {
        let h = history(&[false, false, true, true, true, false]);
        assert_eq!(h.recent_success_rate(Phase::Coding, 4), Some(0.75));
        assert_eq!(h.recent_success_rate(Phase::Debugging, 4), None);
    }

    #[test]
    fn test_trend_detection() {
        assert!(history(&[false, false, true, true]).is_improving(Phase::Coding));
        assert!(history(&[true, true, false, false]).is_degrading(Phase::Coding));
        assert!(!history(&[true, true]).is_improving(Phase::Coding));
        assert!(history(&[true, false, true, false]).is_oscillating(Phase::Coding));
        assert!(!history(&[true, true, false, false]).is_oscillating(Phase::Coding));
    }
}
