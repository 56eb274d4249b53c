//! Property-based tests for the loop breaker
//!
//! Tests the following properties:
//! 1. A pivot is armed exactly once per threshold crossing
//! 2. An issue is abandoned only after every allowed pivot was taken
//! 3. A successful attempt clears all tracking

use convergent::domain::models::{AttemptOutcome, LoopVerdict};
use convergent::services::LoopBreaker;
use proptest::prelude::*;
use uuid::Uuid;

proptest! {
    /// Property: with pivots taken as soon as they are armed, verdicts follow
    /// the threshold exactly and abandonment comes after `max_pivots` pivots
    #[test]
    fn prop_verdicts_follow_threshold(
        threshold in 1u32..6,
        max_pivots in 0u32..4,
        failures in 1u32..30
    ) {
        let mut breaker = LoopBreaker::new(threshold, max_pivots);
        let id = Uuid::new_v4();
        let abandon_at = (max_pivots + 1) * threshold;

        for attempt in 1..=failures {
            let verdict = breaker.record_attempt(id, AttemptOutcome::Failure);
            let expected = if attempt >= abandon_at {
                LoopVerdict::Abandoned
            } else if attempt % threshold == 0 {
                LoopVerdict::PivotRequired
            } else {
                LoopVerdict::Continue
            };
            prop_assert_eq!(verdict, expected, "attempt {}", attempt);

            if verdict == LoopVerdict::PivotRequired {
                prop_assert!(breaker.should_pivot(id));
            }
            prop_assert!(!breaker.should_pivot(id));
        }

        prop_assert_eq!(breaker.is_abandoned(id), failures >= abandon_at);
        let entry = breaker.entry(id).unwrap();
        prop_assert_eq!(entry.total_failures, failures.min(abandon_at));
        prop_assert!(entry.pivots_taken <= max_pivots);
    }

    /// Property: `should_pivot` answers true exactly as many times as a pivot
    /// was required, however often it is polled
    #[test]
    fn prop_pivot_consumed_once(
        threshold in 1u32..5,
        outcomes in prop::collection::vec(any::<bool>(), 1..40),
        polls in 1usize..4
    ) {
        let mut breaker = LoopBreaker::new(threshold, 100);
        let id = Uuid::new_v4();
        let mut required = 0;
        let mut granted = 0;

        for failed in outcomes {
            let outcome = if failed { AttemptOutcome::Failure } else { AttemptOutcome::Success };
            if breaker.record_attempt(id, outcome) == LoopVerdict::PivotRequired {
                required += 1;
            }
            for _ in 0..polls {
                if breaker.should_pivot(id) {
                    granted += 1;
                }
            }
        }
        prop_assert_eq!(granted, required);
    }

    /// Property: success resolves the issue and forgets its history
    #[test]
    fn prop_success_resets(threshold in 1u32..5, failures in 0u32..10) {
        let mut breaker = LoopBreaker::new(threshold, 1);
        let id = Uuid::new_v4();
        for _ in 0..failures {
            if breaker.record_attempt(id, AttemptOutcome::Failure) == LoopVerdict::Abandoned {
                break;
            }
            breaker.should_pivot(id);
        }

        let verdict = breaker.record_attempt(id, AttemptOutcome::Success);
        prop_assert_eq!(verdict, LoopVerdict::Resolved);
        prop_assert!(breaker.entry(id).is_none());
        prop_assert!(!breaker.is_abandoned(id));

        let next = breaker.record_attempt(id, AttemptOutcome::Failure);
        if threshold == 1 {
            prop_assert_eq!(next, LoopVerdict::PivotRequired);
        } else {
            prop_assert_eq!(next, LoopVerdict::Continue);
        }
    }
}

#[test]
fn test_independent_issues_tracked_separately() {
    let mut breaker = LoopBreaker::new(2, 1);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    breaker.record_attempt(a, AttemptOutcome::Failure);
    assert_eq!(breaker.record_attempt(b, AttemptOutcome::Failure), LoopVerdict::Continue);
    assert_eq!(breaker.record_attempt(a, AttemptOutcome::Failure), LoopVerdict::PivotRequired);
    assert!(!breaker.pivot_pending(b));
}
