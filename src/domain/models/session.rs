//! Convergence session state.
//!
//! A [`ConvergenceSession`] is a value. Every state change consumes the
//! session and returns the next one, so the controller is the only writer and
//! workers running inside a wave never see session state at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use super::methodology::MethodologyPool;
use super::pass_record::{PassRecord, SessionEvent, SessionLogEntry};
use crate::domain::errors::{EngineError, EngineResult};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Converged,
    Failed,
    /// Checkpointed and stopped; resumable.
    Suspended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Converged => "converged",
            Self::Failed => "failed",
            Self::Suspended => "suspended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged | Self::Failed)
    }

    pub fn can_transition_to(&self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Running, Self::Converged | Self::Failed | Self::Suspended)
                | (Self::Suspended, Self::Running | Self::Failed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended in [`SessionStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    MaxIterations { iterations: u32 },
    IssuesAbandoned { issue_ids: Vec<Uuid> },
}

/// Which list a log entry landed in. The journal keeps passes and events
/// in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSlot {
    Pass,
    Event,
}

/// State of one subject-review request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceSession {
    pub id: Uuid,
    /// Opaque handle of the subject under review.
    pub subject_id: String,
    pub pool: MethodologyPool,
    pub required_clean_passes: u32,
    pub max_iterations: u32,
    pub consecutive_clean: u32,
    /// Methodologies consumed since the last reset of either kind.
    pub used_in_streak: BTreeSet<String>,
    /// Methodologies with a clean pass since the last issue-bearing pass.
    /// Dependency eligibility is checked against this set.
    pub clean_contributors: BTreeSet<String>,
    /// Whether a priority methodology has appeared in the current streak.
    pub priority_seen: bool,
    pub history: Vec<PassRecord>,
    pub events: Vec<SessionEvent>,
    #[serde(default)]
    pub journal: Vec<LogSlot>,
    /// Issues found per methodology over the whole session.
    #[serde(default)]
    pub issue_yield: BTreeMap<String, u64>,
    pub status: SessionStatus,
    #[serde(default)]
    pub failure_reason: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConvergenceSession {
    pub fn new(
        subject_id: impl Into<String>,
        pool: MethodologyPool,
        required_clean_passes: u32,
        max_iterations: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subject_id: subject_id.into(),
            pool,
            required_clean_passes,
            max_iterations,
            consecutive_clean: 0,
            used_in_streak: BTreeSet::new(),
            clean_contributors: BTreeSet::new(),
            priority_seen: false,
            history: Vec::new(),
            events: Vec::new(),
            journal: Vec::new(),
            issue_yield: BTreeMap::new(),
            status: SessionStatus::Running,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of passes executed so far.
    pub fn iterations(&self) -> u32 {
        u32::try_from(self.history.len()).unwrap_or(u32::MAX)
    }

    pub fn next_iteration(&self) -> u32 {
        self.iterations().saturating_add(1)
    }

    /// Clean passes still needed to converge.
    pub fn required_remaining(&self) -> u32 {
        self.required_clean_passes.saturating_sub(self.consecutive_clean)
    }

    pub fn remaining_iterations(&self) -> u32 {
        self.max_iterations.saturating_sub(self.iterations())
    }

    pub fn is_converged(&self) -> bool {
        self.consecutive_clean >= self.required_clean_passes && self.iterations() <= self.max_iterations
    }

    /// Record a clean pass. Converges the session when the streak is complete.
    pub fn with_clean_pass(mut self, record: PassRecord) -> Self {
        debug_assert!(record.is_clean());
        debug_assert!(
            !self.used_in_streak.contains(&record.methodology),
            "methodology reused within a streak"
        );

        let is_priority = self
            .pool
            .get(&record.methodology)
            .is_some_and(|m| m.priority);

        self.consecutive_clean += 1;
        self.used_in_streak.insert(record.methodology.clone());
        self.clean_contributors.insert(record.methodology.clone());
        self.priority_seen |= is_priority;
        self.push_pass(record);
        self.updated_at = Utc::now();

        if self.status == SessionStatus::Running && self.is_converged() {
            self.push_event(SessionEvent::StatusChanged {
                from: SessionStatus::Running,
                to: SessionStatus::Converged,
            });
            self.status = SessionStatus::Converged;
        }
        self
    }

    /// Record a non-clean pass. Resets the streak and everything tied to it.
    pub fn with_issue_pass(mut self, record: PassRecord) -> Self {
        debug_assert!(!record.is_clean());

        *self.issue_yield.entry(record.methodology.clone()).or_default() += record.issue_count as u64;
        self.push_event(SessionEvent::StreakReset {
            iteration: record.iteration,
            lost_streak: self.consecutive_clean,
        });
        self.consecutive_clean = 0;
        self.used_in_streak.clear();
        self.clean_contributors.clear();
        self.priority_seen = false;
        self.push_pass(record);
        self.updated_at = Utc::now();
        self
    }

    /// Clear the used set after pool exhaustion. The streak itself survives.
    pub fn with_pool_reset(mut self, clear_priority_seen: bool) -> Self {
        let cleared: Vec<String> = std::mem::take(&mut self.used_in_streak).into_iter().collect();
        self.push_event(SessionEvent::PoolReset {
            after_iteration: self.iterations(),
            cleared,
        });
        if clear_priority_seen {
            self.priority_seen = false;
        }
        self.updated_at = Utc::now();
        self
    }

    pub fn with_event(mut self, event: SessionEvent) -> Self {
        self.push_event(event);
        self.updated_at = Utc::now();
        self
    }

    /// Move to `to`, rejecting transitions the state machine does not allow.
    pub fn transition(mut self, to: SessionStatus) -> EngineResult<Self> {
        if self.status == to {
            return Ok(self);
        }
        if !self.status.can_transition_to(to) {
            return Err(EngineError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.push_event(SessionEvent::StatusChanged { from: self.status, to });
        self.status = to;
        self.updated_at = Utc::now();
        Ok(self)
    }

    pub fn fail(self, reason: FailureReason) -> EngineResult<Self> {
        let mut session = self.transition(SessionStatus::Failed)?;
        session.failure_reason = Some(reason);
        Ok(session)
    }

    /// Length of the journal; a mark for [`Self::log_entries_from`].
    pub fn log_len(&self) -> usize {
        self.journal.len()
    }

    /// Passes and events recorded at or after journal position `mark`, in
    /// the order they happened.
    pub fn log_entries_from(&self, mark: usize) -> Vec<SessionLogEntry> {
        let (mut passes, mut events) = (self.history.iter(), self.events.iter());
        self.journal
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let entry = match slot {
                    LogSlot::Pass => passes.next().cloned().map(SessionLogEntry::Pass),
                    LogSlot::Event => events.next().cloned().map(SessionLogEntry::Event),
                };
                entry.filter(|_| index >= mark)
            })
            .collect()
    }

    fn push_pass(&mut self, record: PassRecord) {
        self.history.push(record);
        self.journal.push(LogSlot::Pass);
    }

    fn push_event(&mut self, event: SessionEvent) {
        self.events.push(event);
        self.journal.push(LogSlot::Event);
    }

    /// Number of pool-reset events logged at or after `iteration`.
    pub fn pool_resets_since_iteration(&self, iteration: u32) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, SessionEvent::PoolReset { after_iteration, .. } if *after_iteration >= iteration))
            .count()
    }
}
