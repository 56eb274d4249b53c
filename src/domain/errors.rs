//! Domain errors for the convergence engine.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::ConvergenceSession;

/// Format a cycle path as a human-readable string: `A -> B -> C -> A`.
fn format_cycle_path(path: &[String]) -> String {
    path.join(" -> ")
}

/// Errors that can occur while setting up or driving a convergence session.
///
/// Task-level failures (an executor timing out, a fix that did not apply) are
/// absorbed by the controller and recorded as non-clean passes. Only setup and
/// persistence problems are surfaced through this type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Duplicate methodology name: {0}")]
    DuplicateMethodology(String),

    #[error("Methodology {methodology} depends on unknown methodology {dependency}")]
    UnknownDependency { methodology: String, dependency: String },

    #[error("Dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<String>),

    #[error("Methodology pool is empty")]
    EmptyPool,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transient executor failure: {0}")]
    ExecutorTransient(String),

    #[error("Task timed out after {0} seconds")]
    Timeout(u64),

    #[error("Executor failed: {0}")]
    ExecutorFailed(String),

    #[error("Fix strategy advisor failed: {0}")]
    StrategyUnavailable(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

impl EngineError {
    /// Whether the scheduler should retry the task that produced this error.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ExecutorTransient(_) | Self::Timeout(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A controller step that failed part-way.
///
/// Carries the session as it stood when the error surfaced, so passes that
/// already ran stay with the caller instead of being lost with the step.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct StepError {
    pub session: Box<ConvergenceSession>,
    #[source]
    pub source: EngineError,
}

impl StepError {
    pub fn new(session: ConvergenceSession, source: EngineError) -> Self {
        Self {
            session: Box::new(session),
            source,
        }
    }

    pub fn into_session(self) -> ConvergenceSession {
        *self.session
    }
}

pub type StepResult<T> = Result<T, StepError>;

impl From<StepError> for EngineError {
    fn from(err: StepError) -> Self {
        err.source
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
