//! SQLite implementation of the CheckpointRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_json, parse_uuid};
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Checkpoint, CheckpointReason};
use crate::domain::ports::CheckpointRepository;

const SELECT_COLUMNS: &str = "SELECT id, session_id, reason, session_json, issues_json, pending_waves_json, pending_fix_tasks_json, carried_evidence_json, budget_json, loop_breaker_json, created_at FROM checkpoints";

#[derive(Clone)]
pub struct SqliteCheckpointRepository {
    pool: SqlitePool,
}

impl SqliteCheckpointRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointRepository for SqliteCheckpointRepository {
    async fn save(&self, checkpoint: &Checkpoint) -> EngineResult<()> {
        sqlx::query(
            r#"INSERT INTO checkpoints (id, session_id, reason, session_json, issues_json, pending_waves_json, pending_fix_tasks_json, carried_evidence_json, budget_json, loop_breaker_json, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   reason = excluded.reason,
                   session_json = excluded.session_json,
                   issues_json = excluded.issues_json,
                   pending_waves_json = excluded.pending_waves_json,
                   pending_fix_tasks_json = excluded.pending_fix_tasks_json,
                   carried_evidence_json = excluded.carried_evidence_json,
                   budget_json = excluded.budget_json,
                   loop_breaker_json = excluded.loop_breaker_json"#
        )
        .bind(checkpoint.id.to_string())
        .bind(checkpoint.session_id.to_string())
        .bind(checkpoint.reason.as_str())
        .bind(serde_json::to_string(&checkpoint.session)?)
        .bind(serde_json::to_string(&checkpoint.issues)?)
        .bind(serde_json::to_string(&checkpoint.pending_waves)?)
        .bind(serde_json::to_string(&checkpoint.pending_fix_tasks)?)
        .bind(serde_json::to_string(&checkpoint.carried_evidence)?)
        .bind(serde_json::to_string(&checkpoint.budget)?)
        .bind(serde_json::to_string(&checkpoint.loop_breaker)?)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> EngineResult<Option<Checkpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn latest_for_session(&self, session_id: Uuid) -> EngineResult<Option<Checkpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE session_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn list_for_session(&self, session_id: Uuid) -> EngineResult<Vec<Checkpoint>> {
        let rows: Vec<CheckpointRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE session_id = ? ORDER BY created_at, rowid"
        ))
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    id: String,
    session_id: String,
    reason: String,
    session_json: String,
    issues_json: String,
    pending_waves_json: String,
    pending_fix_tasks_json: String,
    carried_evidence_json: String,
    budget_json: String,
    loop_breaker_json: String,
    created_at: String,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = EngineError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        let reason = CheckpointReason::from_str(&row.reason)
            .ok_or_else(|| EngineError::Serialization(format!("Invalid checkpoint reason: {}", row.reason)))?;

        Ok(Checkpoint {
            id: parse_uuid(&row.id)?,
            session_id: parse_uuid(&row.session_id)?,
            reason,
            session: parse_json(&row.session_json)?,
            issues: parse_json(&row.issues_json)?,
            pending_waves: parse_json(&row.pending_waves_json)?,
            pending_fix_tasks: parse_json(&row.pending_fix_tasks_json)?,
            carried_evidence: parse_json(&row.carried_evidence_json)?,
            budget: parse_json(&row.budget_json)?,
            loop_breaker: parse_json(&row.loop_breaker_json)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
