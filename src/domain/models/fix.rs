//! Fix task domain model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::issue::{Issue, ResourceId, Severity};

/// How a fix should be attempted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixStrategy {
    /// The fix executor's own default approach.
    #[default]
    Standard,
    /// An alternative supplied after the loop breaker demanded a pivot.
    Alternative {
        /// Which pivot produced this approach (1-based).
        pivot: u32,
        description: String,
    },
}

impl FixStrategy {
    pub fn describe(&self) -> &str {
        match self {
            Self::Standard => "standard",
            Self::Alternative { description, .. } => description,
        }
    }
}

/// Status of a fix task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    #[default]
    Pending,
    Applied,
    Failed,
    /// Raced with another fix in the same wave; will be re-run serialized.
    Conflicted,
}

/// A unit of corrective work for one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixTask {
    pub id: Uuid,
    pub issue_id: Uuid,
    pub severity: Severity,
    pub discovery_seq: u64,
    pub target_resources: BTreeSet<ResourceId>,
    /// Proposed change handle passed to the fix executor.
    pub strategy: FixStrategy,
    pub status: FixStatus,
}

impl FixTask {
    pub fn for_issue(issue: &Issue) -> Self {
        Self {
            id: Uuid::new_v4(),
            issue_id: issue.id,
            severity: issue.severity,
            discovery_seq: issue.discovery_seq,
            target_resources: issue.target_resources.clone(),
            strategy: issue.fix_strategy.clone(),
            status: FixStatus::Pending,
        }
    }

    /// Two fixes conflict iff their target resource sets intersect.
    pub fn conflicts_with(&self, other: &Self) -> bool {
        !self.target_resources.is_disjoint(&other.target_resources)
    }
}

/// Result returned by a fix executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixOutcome {
    pub applied: bool,
    /// Resources the executor actually changed.
    #[serde(default)]
    pub resource_delta: BTreeSet<ResourceId>,
    #[serde(default)]
    pub verification_hints: Vec<String>,
}

impl FixOutcome {
    pub fn applied<I, S>(resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ResourceId>,
    {
        Self {
            applied: true,
            resource_delta: resources.into_iter().map(Into::into).collect(),
            verification_hints: Vec::new(),
        }
    }

    pub fn not_applied() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_detection() {
        let a = FixTask::for_issue(&Issue::new("m", Severity::Low, "a").with_resources(["x", "y"]));
        let b = FixTask::for_issue(&Issue::new("m", Severity::Low, "b").with_resource("y"));
        let c = FixTask::for_issue(&Issue::new("m", Severity::Low, "c").with_resource("z"));

        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));
        assert!(!a.conflicts_with(&c));
    }

    #[test]
    fn test_empty_resource_sets_never_conflict() {
        let a = FixTask::for_issue(&Issue::new("m", Severity::Low, "a"));
        let b = FixTask::for_issue(&Issue::new("m", Severity::Low, "b"));
        assert!(!a.conflicts_with(&b));
    }
}
