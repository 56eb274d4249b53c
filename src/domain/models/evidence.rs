//! Evidence and executor reports.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::issue::Issue;
use super::pass_record::PassRecord;

/// A piece of evidence backing a methodology's claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Kind of evidence (e.g. `test_run`, `file_excerpt`).
    pub kind: String,
    /// Where the evidence can be found.
    pub reference: String,
    #[serde(default)]
    pub detail: Option<String>,
}

impl EvidenceItem {
    pub fn new(kind: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            reference: reference.into(),
            detail: None,
        }
    }
}

/// What a methodology executor returns for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodologyReport {
    pub issues: Vec<Issue>,
    pub evidence: Vec<EvidenceItem>,
    pub clean_claimed: bool,
    /// Budget units this pass consumed. Zero means "not reported".
    #[serde(default)]
    pub units_consumed: u64,
}

impl MethodologyReport {
    pub fn clean(evidence: Vec<EvidenceItem>) -> Self {
        Self {
            issues: Vec::new(),
            evidence,
            clean_claimed: true,
            units_consumed: 0,
        }
    }

    pub fn with_issues(issues: Vec<Issue>) -> Self {
        Self {
            issues,
            evidence: Vec::new(),
            clean_claimed: false,
            units_consumed: 0,
        }
    }

    pub fn with_units(mut self, units: u64) -> Self {
        self.units_consumed = units;
        self
    }

    /// Short reference recorded on the pass record.
    pub fn evidence_summary(&self) -> Option<String> {
        if self.evidence.is_empty() {
            return None;
        }
        let refs: Vec<&str> = self.evidence.iter().map(|e| e.reference.as_str()).collect();
        Some(refs.join(";"))
    }
}

/// A claim that a pass found nothing, submitted to the evidence verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanClaim {
    pub methodology: String,
    pub iteration: u32,
    pub subject_revision: u64,
}

/// Read-only view of the subject handed to methodology executors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSnapshot {
    pub subject_id: String,
    /// Bumped by the subject whenever a fix changes it.
    pub revision: u64,
    #[serde(default)]
    pub content_ref: Option<String>,
}

/// Explicit inputs a methodology executor may rely on.
///
/// Executors must be stateless across invocations; anything carried forward
/// arrives here and only here.
#[derive(Debug, Clone, Default)]
pub struct PassContext {
    pub iteration: u32,
    /// Pass records so far, oldest first.
    pub history: Arc<Vec<PassRecord>>,
    /// Evidence from earlier passes. Empty when the mode clears context
    /// between passes.
    pub carried_evidence: Arc<Vec<EvidenceItem>>,
}
