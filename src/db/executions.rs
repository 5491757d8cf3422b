use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::types::ExecutionStatus;

use super::types::json_column;
use super::*;

const EXECUTION_COLUMNS: &str = "id, next_action_id, action_key, idempotency_key, actor_id,
    status, started_at, finished_at, error_code, error_message, meta";

/// Fields of an execution attempt before it is written.
#[derive(Debug, Clone)]
pub struct NewExecution<'a> {
    pub next_action_id: &'a str,
    pub action_key: &'a str,
    pub idempotency_key: Option<&'a str>,
    pub actor_id: Option<&'a str>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error_code: Option<&'a str>,
    pub error_message: Option<&'a str>,
    pub meta: &'a serde_json::Value,
}

impl ActionDb {
    // =========================================================================
    // Executions (append-only audit)
    // =========================================================================

    /// Append one execution row. Returns the new ID.
    pub fn insert_execution(&self, exec: &NewExecution<'_>) -> Result<String, DbError> {
        let id = format!("nbx-{}", Uuid::new_v4());
        self.conn.execute(
            "INSERT INTO next_action_executions (
                id, next_action_id, action_key, idempotency_key, actor_id, status,
                started_at, finished_at, error_code, error_message, meta
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                exec.next_action_id,
                exec.action_key,
                exec.idempotency_key,
                exec.actor_id,
                exec.status.as_str(),
                ts(exec.started_at),
                ts(exec.finished_at),
                exec.error_code,
                exec.error_message,
                exec.meta.to_string(),
            ],
        )?;
        Ok(id)
    }

    /// Most recent successful execution of `(next_action_id, action_key)`
    /// that started at or after `since`.
    pub fn find_recent_success(
        &self,
        next_action_id: &str,
        action_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DbExecution>, DbError> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM next_action_executions
             WHERE next_action_id = ?1 AND action_key = ?2 AND status = 'success'
               AND started_at >= ?3
             ORDER BY started_at DESC
             LIMIT 1"
        );
        let row = self
            .conn
            .query_row(&sql, params![next_action_id, action_key, ts(since)], Self::map_execution_row)
            .optional()?;
        Ok(row)
    }

    /// Execution history for one queue row, newest first.
    pub fn list_executions(&self, next_action_id: &str) -> Result<Vec<DbExecution>, DbError> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM next_action_executions
             WHERE next_action_id = ?1
             ORDER BY started_at DESC, id DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![next_action_id], Self::map_execution_row)?;
        let mut executions = Vec::new();
        for row in rows {
            executions.push(row?);
        }
        Ok(executions)
    }

    pub fn get_execution(&self, id: &str) -> Result<Option<DbExecution>, DbError> {
        let sql = format!("SELECT {EXECUTION_COLUMNS} FROM next_action_executions WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], Self::map_execution_row)
            .optional()?;
        Ok(row)
    }

    fn map_execution_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbExecution> {
        let status: String = row.get(5)?;
        let meta: Option<String> = row.get(10)?;
        Ok(DbExecution {
            id: row.get(0)?,
            next_action_id: row.get(1)?,
            action_key: row.get(2)?,
            idempotency_key: row.get(3)?,
            actor_id: row.get(4)?,
            status: ExecutionStatus::from_str_lossy(&status),
            started_at: row.get(6)?,
            finished_at: row.get(7)?,
            error_code: row.get(8)?,
            error_message: row.get(9)?,
            meta: json_column(meta),
        })
    }
}
