//! Antipattern store port.

use async_trait::async_trait;

use crate::domain::errors::EngineResult;
use crate::domain::models::Antipattern;

/// Knowledge store fed after issue-bearing passes.
///
/// Calls are fire-and-forget; failures are logged and never affect the
/// session.
#[async_trait]
pub trait PatternStore: Send + Sync {
    async fn record(
        &self,
        antipatterns: Vec<Antipattern>,
        prevention_measures: Vec<String>,
    ) -> EngineResult<()>;
}
