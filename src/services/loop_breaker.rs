//! Loop breaker for repeated fix failures.
//!
//! Counts consecutive failed fix attempts per issue. Each time the count
//! reaches the threshold a single pivot is armed; the fix coordinator takes it
//! with [`LoopBreaker::should_pivot`] and asks for a different approach. Once
//! `max_pivots` pivots have been spent and the issue crosses the threshold
//! again, it is abandoned.

use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::models::{AttemptOutcome, EngineConfig, LoopBreakerSnapshot, LoopEntry, LoopVerdict};

#[derive(Debug, Clone)]
pub struct LoopBreaker {
    threshold: u32,
    max_pivots: u32,
    entries: HashMap<Uuid, LoopEntry>,
}

impl LoopBreaker {
    pub fn new(threshold: u32, max_pivots: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            max_pivots,
            entries: HashMap::new(),
        }
    }

    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self::new(config.loop_breaker_threshold, config.max_pivots)
    }

    pub fn restore(snapshot: &LoopBreakerSnapshot) -> Self {
        let mut breaker = Self::new(snapshot.threshold, snapshot.max_pivots);
        breaker.entries = snapshot
            .entries
            .iter()
            .map(|e| (e.issue_id, e.clone()))
            .collect();
        breaker
    }

    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Record the outcome of one fix attempt.
    pub fn record_attempt(&mut self, issue_id: Uuid, outcome: AttemptOutcome) -> LoopVerdict {
        if outcome == AttemptOutcome::Success {
            self.entries.remove(&issue_id);
            return LoopVerdict::Resolved;
        }

        let threshold = self.threshold;
        let max_pivots = self.max_pivots;
        let entry = self
            .entries
            .entry(issue_id)
            .or_insert_with(|| LoopEntry::new(issue_id));

        if entry.abandoned {
            return LoopVerdict::Abandoned;
        }

        entry.consecutive_failures += 1;
        entry.total_failures += 1;

        if entry.consecutive_failures < threshold {
            return LoopVerdict::Continue;
        }

        entry.consecutive_failures = 0;
        if entry.pivots_taken >= max_pivots {
            entry.abandoned = true;
            entry.pivot_armed = false;
            tracing::warn!(
                issue_id = %issue_id,
                total_failures = entry.total_failures,
                pivots = entry.pivots_taken,
                "issue abandoned after exhausting pivots"
            );
            return LoopVerdict::Abandoned;
        }

        entry.pivot_armed = true;
        tracing::info!(
            issue_id = %issue_id,
            pivot = entry.pivots_taken + 1,
            "fix attempts hit loop threshold, pivot required"
        );
        LoopVerdict::PivotRequired
    }

    /// Returns `true` exactly once per threshold crossing, consuming the
    /// armed pivot.
    pub fn should_pivot(&mut self, issue_id: Uuid) -> bool {
        self.take_pivot(issue_id).is_some()
    }

    /// Consume an armed pivot, returning its 1-based number.
    pub fn take_pivot(&mut self, issue_id: Uuid) -> Option<u32> {
        let entry = self.entries.get_mut(&issue_id)?;
        if !entry.pivot_armed {
            return None;
        }
        entry.pivot_armed = false;
        entry.pivots_taken += 1;
        Some(entry.pivots_taken)
    }

    /// Whether a pivot is armed, without consuming it.
    pub fn pivot_pending(&self, issue_id: Uuid) -> bool {
        self.entries.get(&issue_id).is_some_and(|e| e.pivot_armed)
    }

    pub fn is_abandoned(&self, issue_id: Uuid) -> bool {
        self.entries.get(&issue_id).is_some_and(|e| e.abandoned)
    }

    pub fn entry(&self, issue_id: Uuid) -> Option<&LoopEntry> {
        self.entries.get(&issue_id)
    }

    pub fn snapshot(&self) -> LoopBreakerSnapshot {
        let mut entries: Vec<LoopEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.issue_id);
        LoopBreakerSnapshot {
            threshold: self.threshold,
            max_pivots: self.max_pivots,
            entries,
        }
    }
}

impl Default for LoopBreaker {
    fn default() -> Self {
        Self::new(3, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail_n(breaker: &mut LoopBreaker, id: Uuid, n: u32) -> Vec<LoopVerdict> {
        (0..n)
            .map(|_| breaker.record_attempt(id, AttemptOutcome::Failure))
            .collect()
    }

    #[test]
    fn test_pivot_armed_at_threshold() {
        let mut breaker = LoopBreaker::new(3, 2);
        let id = Uuid::new_v4();

        let verdicts = fail_n(&mut breaker, id, 2);
        assert_eq!(verdicts, vec![LoopVerdict::Continue, LoopVerdict::Continue]);
        assert!(!breaker.should_pivot(id));

        assert_eq!(breaker.record_attempt(id, AttemptOutcome::Failure), LoopVerdict::PivotRequired);
        assert!(breaker.should_pivot(id));
        assert!(!breaker.should_pivot(id));
    }

    #[test]
    fn test_rearms_after_next_threshold() {
        let mut breaker = LoopBreaker::new(3, 2);
        let id = Uuid::new_v4();

        fail_n(&mut breaker, id, 3);
        assert_eq!(breaker.take_pivot(id), Some(1));

        fail_n(&mut breaker, id, 2);
        assert!(!breaker.pivot_pending(id));
        fail_n(&mut breaker, id, 1);
        assert_eq!(breaker.take_pivot(id), Some(2));
    }

    #[test]
    fn test_abandoned_after_two_pivots() {
        let mut breaker = LoopBreaker::new(3, 2);
        let id = Uuid::new_v4();

        fail_n(&mut breaker, id, 3);
        assert!(breaker.should_pivot(id));
        fail_n(&mut breaker, id, 3);
        assert!(breaker.should_pivot(id));
        let verdicts = fail_n(&mut breaker, id, 3);

        assert_eq!(verdicts.last(), Some(&LoopVerdict::Abandoned));
        assert!(breaker.is_abandoned(id));
        assert!(!breaker.should_pivot(id));
        assert_eq!(breaker.record_attempt(id, AttemptOutcome::Failure), LoopVerdict::Abandoned);
        assert_eq!(breaker.entry(id).unwrap().total_failures, 9);
    }

    #[test]
    fn test_success_clears_tracking() {
        let mut breaker = LoopBreaker::new(3, 2);
        let id = Uuid::new_v4();

        fail_n(&mut breaker, id, 2);
        assert_eq!(breaker.record_attempt(id, AttemptOutcome::Success), LoopVerdict::Resolved);
        assert!(breaker.entry(id).is_none());
        assert_eq!(fail_n(&mut breaker, id, 2), vec![LoopVerdict::Continue, LoopVerdict::Continue]);
    }

    #[test]
    fn test_issues_tracked_independently() {
        let mut breaker = LoopBreaker::new(2, 1);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        fail_n(&mut breaker, a, 2);
        fail_n(&mut breaker, b, 1);
        assert!(breaker.pivot_pending(a));
        assert!(!breaker.pivot_pending(b));
    }

    #[test]
    fn test_snapshot_restore() {
        let mut breaker = LoopBreaker::new(3, 2);
        let id = Uuid::new_v4();
        fail_n(&mut breaker, id, 3);

        let restored = LoopBreaker::restore(&breaker.snapshot());
        assert!(restored.pivot_pending(id));
        assert_eq!(restored.threshold(), 3);
    }
}
