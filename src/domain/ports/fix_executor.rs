//! Fix executor port.

use async_trait::async_trait;

use crate::domain::errors::EngineResult;
use crate::domain::models::{FixOutcome, FixTask, Issue};

/// Applies a corrective change for one issue.
///
/// The coordinator guarantees no two calls with overlapping
/// `task.target_resources` run at the same time.
#[async_trait]
pub trait FixExecutor: Send + Sync {
    async fn apply(&self, issue: &Issue, task: &FixTask) -> EngineResult<FixOutcome>;
}
