//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces for every collaborator the
//! engine consumes but does not implement:
//! - MethodologyExecutor / FixExecutor: the domain-specific check and fix logic
//! - EvidenceVerifier: acceptance of clean claims
//! - FixStrategyAdvisor: alternative approaches after a pivot
//! - PatternStore: fire-and-forget knowledge capture
//! - Subject: the artifact under review
//! - CheckpointRepository / SessionLogRepository: persisted state
//!
//! Executors are registered by injection, never captured as closures, so they
//! can be swapped and mocked.

pub mod checkpoint_repository;
pub mod evidence_verifier;
pub mod fix_executor;
pub mod fix_strategy;
pub mod methodology_executor;
pub mod null_collaborators;
pub mod pattern_store;
pub mod session_log_repository;
pub mod subject;

pub use checkpoint_repository::CheckpointRepository;
pub use evidence_verifier::EvidenceVerifier;
pub use fix_executor::FixExecutor;
pub use fix_strategy::FixStrategyAdvisor;
pub use methodology_executor::MethodologyExecutor;
pub use null_collaborators::{GenericAlternativeAdvisor, NullPatternStore, RequireAnyEvidence, TrustingVerifier};
pub use pattern_store::PatternStore;
pub use session_log_repository::SessionLogRepository;
pub use subject::Subject;
