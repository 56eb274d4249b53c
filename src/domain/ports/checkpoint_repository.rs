//! Checkpoint repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::EngineResult;
use crate::domain::models::Checkpoint;

/// Storage for session checkpoints.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> EngineResult<()>;

    async fn get(&self, id: Uuid) -> EngineResult<Option<Checkpoint>>;

    /// Most recent checkpoint of a session.
    async fn latest_for_session(&self, session_id: Uuid) -> EngineResult<Option<Checkpoint>>;

    /// All checkpoints of a session, oldest first.
    async fn list_for_session(&self, session_id: Uuid) -> EngineResult<Vec<Checkpoint>>;
}
