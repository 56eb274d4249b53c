//! Subject port.

use async_trait::async_trait;

use crate::domain::errors::EngineResult;
use crate::domain::models::SubjectSnapshot;

/// Handle to the mutable artifact under review.
///
/// The engine never looks inside the subject; it only asks for a snapshot
/// before each wave of methodology passes.
#[async_trait]
pub trait Subject: Send + Sync {
    fn id(&self) -> &str;

    async fn snapshot(&self) -> EngineResult<SubjectSnapshot>;
}
