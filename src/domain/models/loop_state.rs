//! Per-issue fix-attempt tracking state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one fix attempt, as seen by the loop breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// What the loop breaker decided after an attempt was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopVerdict {
    /// Keep going with the current strategy.
    Continue,
    /// Threshold crossed; the next attempt must use a different approach.
    PivotRequired,
    /// Every allowed pivot was spent without success.
    Abandoned,
    /// The issue is resolved; tracking stopped.
    Resolved,
}

/// Tracking state for one issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopEntry {
    pub issue_id: Uuid,
    /// Failed attempts since the last pivot (or since tracking began).
    pub consecutive_failures: u32,
    /// Total failed attempts.
    pub total_failures: u32,
    pub pivots_taken: u32,
    /// A pivot is owed and has not been taken yet.
    pub pivot_armed: bool,
    pub abandoned: bool,
}

impl LoopEntry {
    pub fn new(issue_id: Uuid) -> Self {
        Self {
            issue_id,
            ..Self::default()
        }
    }
}

/// Serializable snapshot of the loop breaker, stored in checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopBreakerSnapshot {
    pub threshold: u32,
    pub max_pivots: u32,
    pub entries: Vec<LoopEntry>,
}
