//! Fix strategy advisor port.

use async_trait::async_trait;

use crate::domain::errors::EngineResult;
use crate::domain::models::{FixStrategy, Issue};

/// Supplies an alternative approach when the loop breaker demands a pivot.
#[async_trait]
pub trait FixStrategyAdvisor: Send + Sync {
    /// `pivot` is 1 for the first pivot on this issue, 2 for the second.
    async fn alternative(&self, issue: &Issue, pivot: u32) -> EngineResult<FixStrategy>;
}
