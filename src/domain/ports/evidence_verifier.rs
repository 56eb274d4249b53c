//! Evidence verifier port.

use async_trait::async_trait;

use crate::domain::models::{CleanClaim, EvidenceItem};

/// Decides whether a claimed-clean pass is backed by its evidence.
///
/// A `false` answer downgrades the pass to issue-bearing. It is a policy
/// decision, not an error.
#[async_trait]
pub trait EvidenceVerifier: Send + Sync {
    async fn verify(&self, claim: &CleanClaim, evidence: &[EvidenceItem]) -> bool;
}
