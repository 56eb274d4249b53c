//! In-memory append-only session log.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::EngineResult;
use crate::domain::models::SessionLogEntry;
use crate::domain::ports::SessionLogRepository;

#[derive(Debug, Clone, Default)]
pub struct InMemorySessionLog {
    entries: Arc<RwLock<HashMap<Uuid, Vec<SessionLogEntry>>>>,
}

impl InMemorySessionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionLogRepository for InMemorySessionLog {
    async fn append(&self, session_id: Uuid, entry: &SessionLogEntry) -> EngineResult<()> {
        self.entries
            .write()
            .await
            .entry(session_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn entries(&self, session_id: Uuid) -> EngineResult<Vec<SessionLogEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }
}
