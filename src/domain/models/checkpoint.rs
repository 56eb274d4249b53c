//! Checkpoint snapshots for suspend/resume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::budget::ResourceBudget;
use super::evidence::EvidenceItem;
use super::fix::FixTask;
use super::issue::Issue;
use super::loop_state::LoopBreakerSnapshot;
use super::session::ConvergenceSession;
use super::wave::ExecutionWave;

/// Why a checkpoint was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    /// Consumption crossed the configured threshold fraction.
    ThresholdCrossed,
    /// Consumption reached the cap.
    BudgetExhausted,
    /// Written just before stopping on a terminal status.
    Terminal,
}

impl CheckpointReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThresholdCrossed => "threshold_crossed",
            Self::BudgetExhausted => "budget_exhausted",
            Self::Terminal => "terminal",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "threshold_crossed" => Some(Self::ThresholdCrossed),
            "budget_exhausted" => Some(Self::BudgetExhausted),
            "terminal" => Some(Self::Terminal),
            _ => None,
        }
    }
}

/// Everything needed to resume a session without re-running completed waves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub session_id: Uuid,
    pub reason: CheckpointReason,
    pub session: ConvergenceSession,
    /// Issue registry at the time of the checkpoint.
    pub issues: Vec<Issue>,
    /// Waves of the current selection that had not been dispatched.
    pub pending_waves: Vec<ExecutionWave>,
    /// Fix tasks referenced by pending fix waves.
    #[serde(default)]
    pub pending_fix_tasks: Vec<FixTask>,
    /// Evidence handed forward to later passes when the mode keeps context.
    #[serde(default)]
    pub carried_evidence: Vec<EvidenceItem>,
    pub budget: ResourceBudget,
    pub loop_breaker: LoopBreakerSnapshot,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        reason: CheckpointReason,
        session: ConvergenceSession,
        issues: Vec<Issue>,
        pending_waves: Vec<ExecutionWave>,
        budget: ResourceBudget,
        loop_breaker: LoopBreakerSnapshot,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session.id,
            reason,
            session,
            issues,
            pending_waves,
            pending_fix_tasks: Vec::new(),
            carried_evidence: Vec::new(),
            budget,
            loop_breaker,
            created_at: Utc::now(),
        }
    }

    pub fn with_pending_fix_tasks(mut self, tasks: Vec<FixTask>) -> Self {
        self.pending_fix_tasks = tasks;
        self
    }

    pub fn with_carried_evidence(mut self, evidence: Vec<EvidenceItem>) -> Self {
        self.carried_evidence = evidence;
        self
    }

    pub fn has_pending_work(&self) -> bool {
        self.pending_waves.iter().any(|w| !w.is_empty()) || !self.pending_fix_tasks.is_empty()
    }
}
