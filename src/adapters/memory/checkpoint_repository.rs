//! In-memory checkpoint repository.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::EngineResult;
use crate::domain::models::Checkpoint;
use crate::domain::ports::CheckpointRepository;

/// Checkpoints kept in insertion order behind a lock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointRepository {
    checkpoints: Arc<RwLock<Vec<Checkpoint>>>,
}

impl InMemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }

    /// Checkpoints stored per session.
    pub async fn counts(&self) -> HashMap<Uuid, usize> {
        let mut counts = HashMap::new();
        for checkpoint in self.checkpoints.read().await.iter() {
            *counts.entry(checkpoint.session_id).or_default() += 1;
        }
        counts
    }
}

#[async_trait]
impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn save(&self, checkpoint: &Checkpoint) -> EngineResult<()> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.retain(|c| c.id != checkpoint.id);
        checkpoints.push(checkpoint.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> EngineResult<Option<Checkpoint>> {
        Ok(self.checkpoints.read().await.iter().find(|c| c.id == id).cloned())
    }

    async fn latest_for_session(&self, session_id: Uuid) -> EngineResult<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .iter()
            .rev()
            .find(|c| c.session_id == session_id)
            .cloned())
    }

    async fn list_for_session(&self, session_id: Uuid) -> EngineResult<Vec<Checkpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .iter()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect())
    }
}
