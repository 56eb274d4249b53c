//! Session log port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::EngineResult;
use crate::domain::models::SessionLogEntry;

/// Append-only log of pass records and session events.
#[async_trait]
pub trait SessionLogRepository: Send + Sync {
    async fn append(&self, session_id: Uuid, entry: &SessionLogEntry) -> EngineResult<()>;

    /// Entries in append order.
    async fn entries(&self, session_id: Uuid) -> EngineResult<Vec<SessionLogEntry>>;
}
