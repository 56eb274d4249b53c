//! Convergent - Iterative Convergence Engine
//!
//! Drives a mutable subject (a codebase, a document, a plan) toward stability
//! by repeatedly running randomly chosen review methodologies against it,
//! fixing whatever they report, and stopping once a configured number of
//! consecutive, distinct methodologies find nothing.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): session state, models, and port traits
//! - **Service Layer** (`services`): pool selection, wave scheduling, fix
//!   coordination, loop breaking, budget tracking and the controller
//! - **Adapters** (`adapters`): in-memory, SQLite and scripted port implementations
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use convergent::{ConfigLoader, ConvergenceController};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let mut controller = ConvergenceController::new(config, subject, checks, fixer);
//!     let session = controller.new_session()?;
//!     let report = controller.run(session).await?;
//!     println!("{:?} after {} passes", report.status, report.iterations);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{EngineError, EngineResult, StepError};
pub use domain::models::{
    Checkpoint, CheckpointReason, ConvergenceSession, EngineConfig, EvidenceItem, FailureReason, FixOutcome,
    FixStrategy, FixTask, Issue, IssueStatus, Methodology, MethodologyPool, MethodologyReport, ModePreset,
    PassContext, PassRecord, SessionEvent, SessionStatus, Severity, SubjectSnapshot,
};
pub use domain::ports::{
    CheckpointRepository, EvidenceVerifier, FixExecutor, FixStrategyAdvisor, MethodologyExecutor, PatternStore,
    SessionLogRepository, Subject,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ConvergenceController, ConvergenceReport, StepOutcome};
