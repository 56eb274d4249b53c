//! SQLite implementation of the SessionLogRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::parse_json;
use crate::domain::errors::EngineResult;
use crate::domain::models::SessionLogEntry;
use crate::domain::ports::SessionLogRepository;

#[derive(Clone)]
pub struct SqliteSessionLogRepository {
    pool: SqlitePool,
}

impl SqliteSessionLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn entry_kind(entry: &SessionLogEntry) -> &'static str {
    match entry {
        SessionLogEntry::Pass(_) => "pass",
        SessionLogEntry::Event(_) => "event",
    }
}

#[async_trait]
impl SessionLogRepository for SqliteSessionLogRepository {
    async fn append(&self, session_id: Uuid, entry: &SessionLogEntry) -> EngineResult<()> {
        let entry_json = serde_json::to_string(entry)?;

        // Sequence is computed in the insert so concurrent appenders on one
        // pool cannot reuse a slot.
        sqlx::query(
            r#"INSERT INTO session_log (session_id, seq, kind, entry_json, created_at)
               SELECT ?, COALESCE(MAX(seq), 0) + 1, ?, ?, ? FROM session_log WHERE session_id = ?"#
        )
        .bind(session_id.to_string())
        .bind(entry_kind(entry))
        .bind(&entry_json)
        .bind(Utc::now().to_rfc3339())
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn entries(&self, session_id: Uuid) -> EngineResult<Vec<SessionLogEntry>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT entry_json FROM session_log WHERE session_id = ? ORDER BY seq"
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|(json,)| parse_json(json)).collect()
    }
}
