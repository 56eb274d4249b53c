//! Null collaborator implementations.
//!
//! Used when a collaborator is not needed but the controller requires one.

use async_trait::async_trait;

use super::{EvidenceVerifier, FixStrategyAdvisor, PatternStore};
use crate::domain::errors::EngineResult;
use crate::domain::models::{Antipattern, CleanClaim, EvidenceItem, FixStrategy, Issue};

/// A pattern store that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPatternStore;

#[async_trait]
impl PatternStore for NullPatternStore {
    async fn record(&self, _antipatterns: Vec<Antipattern>, _prevention: Vec<String>) -> EngineResult<()> {
        Ok(())
    }
}

/// Accepts a clean claim whenever at least one evidence item backs it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireAnyEvidence;

#[async_trait]
impl EvidenceVerifier for RequireAnyEvidence {
    async fn verify(&self, _claim: &CleanClaim, evidence: &[EvidenceItem]) -> bool {
        !evidence.is_empty()
    }
}

/// Accepts every clean claim.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustingVerifier;

#[async_trait]
impl EvidenceVerifier for TrustingVerifier {
    async fn verify(&self, _claim: &CleanClaim, _evidence: &[EvidenceItem]) -> bool {
        true
    }
}

/// Answers every pivot with a generic "try a different approach" strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericAlternativeAdvisor;

#[async_trait]
impl FixStrategyAdvisor for GenericAlternativeAdvisor {
    async fn alternative(&self, issue: &Issue, pivot: u32) -> EngineResult<FixStrategy> {
        Ok(FixStrategy::Alternative {
            pivot,
            description: format!("alternative approach #{pivot} for {}", issue.description),
        })
    }
}
