//! Resource budget monitor.
//!
//! Tracks consumption of a bounded analysis budget. Workers inside a wave
//! record units concurrently; the controller consults
//! [`BudgetMonitor::should_checkpoint`] before every dispatch and resets the
//! segment once a checkpoint has been written.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::domain::models::{EngineConfig, ResourceBudget};

#[derive(Debug)]
struct Inner {
    consumed: AtomicU64,
    lifetime_consumed: AtomicU64,
    segments: AtomicU64,
    checkpoint_logged: AtomicBool,
}

/// Shared budget counter. Cloning yields another handle to the same counter.
#[derive(Debug, Clone)]
pub struct BudgetMonitor {
    cap: u64,
    threshold: f64,
    inner: Arc<Inner>,
}

impl BudgetMonitor {
    pub fn new(cap: u64, threshold: f64) -> Self {
        Self {
            cap,
            threshold,
            inner: Arc::new(Inner {
                consumed: AtomicU64::new(0),
                lifetime_consumed: AtomicU64::new(0),
                segments: AtomicU64::new(0),
                checkpoint_logged: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self::new(config.budget_cap, config.checkpoint_threshold)
    }

    /// Restore from a checkpointed budget.
    pub fn from_budget(budget: &ResourceBudget) -> Self {
        let monitor = Self::new(budget.cap, budget.checkpoint_threshold);
        monitor.inner.consumed.store(budget.consumed, Ordering::SeqCst);
        monitor
    }

    /// Add consumed units.
    pub fn record(&self, units: u64) {
        let before = self.inner.consumed.fetch_add(units, Ordering::SeqCst);
        self.inner.lifetime_consumed.fetch_add(units, Ordering::SeqCst);

        let after = before.saturating_add(units);
        if self.snapshot_with(after).threshold_crossed()
            && !self.inner.checkpoint_logged.swap(true, Ordering::SeqCst)
        {
            tracing::info!(
                consumed = after,
                cap = self.cap,
                threshold = self.threshold,
                "budget checkpoint threshold crossed"
            );
        }
    }

    /// True once consumption in the current segment crosses the threshold.
    pub fn should_checkpoint(&self) -> bool {
        self.snapshot().threshold_crossed()
    }

    /// True once consumption in the current segment reaches the cap.
    pub fn is_exhausted(&self) -> bool {
        self.snapshot().exhausted()
    }

    /// Start a new segment after a checkpoint has been persisted.
    pub fn reset_segment(&self) {
        let consumed = self.inner.consumed.swap(0, Ordering::SeqCst);
        self.inner.checkpoint_logged.store(false, Ordering::SeqCst);
        let segment = self.inner.segments.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(segment, carried_over = consumed, "budget segment reset");
    }

    pub fn snapshot(&self) -> ResourceBudget {
        self.snapshot_with(self.inner.consumed.load(Ordering::SeqCst))
    }

    pub fn lifetime_consumed(&self) -> u64 {
        self.inner.lifetime_consumed.load(Ordering::SeqCst)
    }

    pub fn segments_completed(&self) -> u64 {
        self.inner.segments.load(Ordering::SeqCst)
    }

    fn snapshot_with(&self, consumed: u64) -> ResourceBudget {
        ResourceBudget {
            consumed,
            cap: self.cap,
            checkpoint_threshold: self.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_after_threshold() {
        let monitor = BudgetMonitor::new(100, 0.75);
        monitor.record(50);
        assert!(!monitor.should_checkpoint());
        monitor.record(25);
        assert!(monitor.should_checkpoint());
        assert!(!monitor.is_exhausted());
        monitor.record(25);
        assert!(monitor.is_exhausted());
    }

    #[test]
    fn test_reset_segment_keeps_lifetime_total() {
        let monitor = BudgetMonitor::new(10, 0.5);
        monitor.record(6);
        assert!(monitor.should_checkpoint());

        monitor.reset_segment();
        assert!(!monitor.should_checkpoint());
        assert_eq!(monitor.snapshot().consumed, 0);
        assert_eq!(monitor.lifetime_consumed(), 6);
        assert_eq!(monitor.segments_completed(), 1);
    }

    #[test]
    fn test_clones_share_counter() {
        let monitor = BudgetMonitor::new(100, 0.75);
        let worker = monitor.clone();
        worker.record(80);
        assert!(monitor.should_checkpoint());
    }

    #[test]
    fn test_restore_from_budget() {
        let budget = ResourceBudget {
            consumed: 40,
            cap: 50,
            checkpoint_threshold: 0.75,
        };
        let monitor = BudgetMonitor::from_budget(&budget);
        assert!(monitor.should_checkpoint());
        assert_eq!(monitor.snapshot(), budget);
    }

    #[tokio::test]
    async fn test_concurrent_records() {
        let monitor = BudgetMonitor::new(1_000, 0.75);
        let mut handles = Vec::new();
        for _ in 0..10 {
            let m = monitor.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    m.record(1);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(monitor.snapshot().consumed, 100);
    }
}
