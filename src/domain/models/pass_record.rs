//! Pass records and session log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::SessionStatus;
use super::wave::ResourceConflict;

/// Outcome of a single methodology pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    Clean,
    Issues,
}

/// Why a pass that was not clean ended up that way, beyond reported issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonCleanCause {
    /// The methodology reported issues.
    Reported,
    /// The executor claimed clean but the evidence verifier rejected it.
    VerificationRejected,
    /// The executor returned no issues but did not claim clean.
    Unclaimed,
    /// Retries were exhausted; synthetic failure.
    ExecutorFailure,
}

/// One methodology execution. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassRecord {
    /// 1-based iteration index within the session.
    pub iteration: u32,
    pub methodology: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: PassOutcome,
    pub issue_count: usize,
    #[serde(default)]
    pub evidence_ref: Option<String>,
    #[serde(default)]
    pub cause: Option<NonCleanCause>,
}

impl PassRecord {
    pub fn clean(iteration: u32, methodology: impl Into<String>, evidence_ref: Option<String>) -> Self {
        Self {
            iteration,
            methodology: methodology.into(),
            timestamp: Utc::now(),
            outcome: PassOutcome::Clean,
            issue_count: 0,
            evidence_ref,
            cause: None,
        }
    }

    pub fn with_issues(
        iteration: u32,
        methodology: impl Into<String>,
        issue_count: usize,
        cause: NonCleanCause,
        evidence_ref: Option<String>,
    ) -> Self {
        Self {
            iteration,
            methodology: methodology.into(),
            timestamp: Utc::now(),
            outcome: PassOutcome::Issues,
            issue_count,
            evidence_ref,
            cause: Some(cause),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.outcome == PassOutcome::Clean
    }
}

/// Notable things that happen to a session besides passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Every eligible methodology was used in the current streak; the used
    /// set was cleared. `after_iteration` is the last iteration before reset.
    PoolReset { after_iteration: u32, cleared: Vec<String> },
    /// Selection was narrowed to priority methodologies.
    PriorityRestricted { iteration: u32, candidates: Vec<String> },
    /// A pass with issues reset the streak.
    StreakReset { iteration: u32, lost_streak: u32 },
    /// A claimed-clean pass whose evidence the verifier rejected.
    VerificationDowngraded { iteration: u32, methodology: String },
    CheckpointWritten { checkpoint_id: Uuid, consumed_units: u64 },
    ResourceConflict(ResourceConflict),
    Pivot { issue_id: Uuid, pivot: u32, strategy: String },
    IssueAbandoned { issue_id: Uuid, attempts: u32 },
    IssueFixed { issue_id: Uuid },
    StatusChanged { from: SessionStatus, to: SessionStatus },
}

/// Entry in the append-only session log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entry", content = "data", rename_all = "snake_case")]
pub enum SessionLogEntry {
    Pass(PassRecord),
    Event(SessionEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_constructors() {
        let clean = PassRecord::clean(1, "security", Some("ev-1".into()));
        assert!(clean.is_clean());
        assert_eq!(clean.issue_count, 0);
        assert!(clean.cause.is_none());

        let dirty = PassRecord::with_issues(2, "style", 3, NonCleanCause::Reported, None);
        assert!(!dirty.is_clean());
        assert_eq!(dirty.cause, Some(NonCleanCause::Reported));
    }

    #[test]
    fn test_log_entry_serde() {
        let entry = SessionLogEntry::Event(SessionEvent::PoolReset {
            after_iteration: 2,
            cleared: vec!["a".into(), "b".into()],
        });
        let json = serde_json::to_string(&entry).unwrap();
        let back: SessionLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }
}
