//! Resource budget model.

use serde::{Deserialize, Serialize};

/// Consumption of a bounded analysis resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceBudget {
    /// Units consumed in the current segment.
    pub consumed: u64,
    /// Hard cap per segment.
    pub cap: u64,
    /// Fraction of `cap` at which a checkpoint is required, in `(0.0, 1.0]`.
    pub checkpoint_threshold: f64,
}

impl ResourceBudget {
    pub const DEFAULT_THRESHOLD: f64 = 0.75;

    pub fn new(cap: u64, checkpoint_threshold: f64) -> Self {
        Self {
            consumed: 0,
            cap,
            checkpoint_threshold,
        }
    }

    /// Fraction of the cap consumed, in `[0.0, ∞)`.
    #[allow(clippy::cast_precision_loss)]
    pub fn consumed_fraction(&self) -> f64 {
        if self.cap == 0 {
            return 1.0;
        }
        self.consumed as f64 / self.cap as f64
    }

    pub fn threshold_crossed(&self) -> bool {
        self.consumed_fraction() >= self.checkpoint_threshold
    }

    pub fn exhausted(&self) -> bool {
        self.consumed >= self.cap
    }

    pub fn remaining(&self) -> u64 {
        self.cap.saturating_sub(self.consumed)
    }
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self::new(10_000, Self::DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_and_exhaustion() {
        let mut budget = ResourceBudget::new(100, 0.75);
        budget.consumed = 74;
        assert!(!budget.threshold_crossed());
        budget.consumed = 75;
        assert!(budget.threshold_crossed());
        assert!(!budget.exhausted());
        budget.consumed = 100;
        assert!(budget.exhausted());
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_zero_cap_is_exhausted() {
        let budget = ResourceBudget::new(0, 0.75);
        assert!(budget.exhausted());
        assert!(budget.threshold_crossed());
    }
}
