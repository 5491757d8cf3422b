use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::types::{ActionStatus, ExecutionStatus, Priority, RankedCandidate};

use super::types::json_column;
use super::*;

const NEXT_ACTION_COLUMNS: &str = "id, dedupe_key, title, reason, priority, score, score_breakdown,
    status, snoozed_until, source_type, source_id, action_url, payload, entity_type, entity_id,
    created_by_rule, last_executed_at, last_execution_status, last_execution_error,
    created_at, updated_at, completed_at, dismissed_at";

/// Per-status counts for one scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub queued: i64,
    pub snoozed: i64,
    pub done: i64,
    pub dismissed: i64,
}

impl ActionDb {
    // =========================================================================
    // Next actions
    // =========================================================================

    /// Get a single queue row by ID.
    pub fn get_next_action(&self, id: &str) -> Result<Option<DbNextAction>, DbError> {
        let sql = format!("SELECT {NEXT_ACTION_COLUMNS} FROM next_actions WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], Self::map_next_action_row)
            .optional()?;
        Ok(row)
    }

    /// Get a single queue row by its natural identity.
    pub fn get_next_action_by_dedupe_key(
        &self,
        dedupe_key: &str,
    ) -> Result<Option<DbNextAction>, DbError> {
        let sql = format!("SELECT {NEXT_ACTION_COLUMNS} FROM next_actions WHERE dedupe_key = ?1");
        let row = self
            .conn
            .query_row(&sql, params![dedupe_key], Self::map_next_action_row)
            .optional()?;
        Ok(row)
    }

    /// Insert a new `queued` row for a ranked candidate. Returns the new ID.
    pub fn insert_next_action(
        &self,
        ranked: &RankedCandidate,
        now: DateTime<Utc>,
    ) -> Result<String, DbError> {
        let id = format!("nba-{}", Uuid::new_v4());
        let candidate = &ranked.candidate;
        let now = ts(now);
        self.conn.execute(
            "INSERT INTO next_actions (
                id, dedupe_key, title, reason, priority, score, score_breakdown, status,
                source_type, source_id, action_url, payload, entity_type, entity_id,
                created_by_rule, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'queued', ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
            params![
                id,
                candidate.dedupe_key,
                candidate.title,
                candidate.reason,
                candidate.priority.as_str(),
                ranked.score,
                serde_json::to_string(&ranked.breakdown)?,
                candidate.source_type,
                candidate.source_id,
                candidate.action_url,
                candidate.payload.to_string(),
                candidate.entity_type,
                candidate.entity_id,
                candidate.created_by_rule,
                now,
            ],
        )?;
        Ok(id)
    }

    /// Overwrite the mutable fields of an open row.
    ///
    /// The status and snooze gate are checked in the same statement as the
    /// write, so a terminal transition that lands between the caller's read
    /// and this call is never overwritten. Returns false when nothing changed.
    pub fn refresh_queued_next_action(
        &self,
        ranked: &RankedCandidate,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let candidate = &ranked.candidate;
        let now = ts(now);
        let changed = self.conn.execute(
            "UPDATE next_actions SET
                title = ?1, reason = ?2, priority = ?3, score = ?4, score_breakdown = ?5,
                source_type = ?6, source_id = ?7, action_url = ?8, payload = ?9,
                updated_at = ?10
             WHERE dedupe_key = ?11
               AND status = 'queued'
               AND (snoozed_until IS NULL OR snoozed_until <= ?10)",
            params![
                candidate.title,
                candidate.reason,
                candidate.priority.as_str(),
                ranked.score,
                serde_json::to_string(&ranked.breakdown)?,
                candidate.source_type,
                candidate.source_id,
                candidate.action_url,
                candidate.payload.to_string(),
                now,
                candidate.dedupe_key,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Move a queued row to `done`. Returns false if the row is not queued.
    pub fn complete_next_action(&self, id: &str, now: DateTime<Utc>) -> Result<bool, DbError> {
        let now = ts(now);
        let changed = self.conn.execute(
            "UPDATE next_actions SET status = 'done', completed_at = ?1, updated_at = ?1
             WHERE id = ?2 AND status = 'queued'",
            params![now, id],
        )?;
        Ok(changed > 0)
    }

    /// Move a queued row to `dismissed`. Returns false if the row is not queued.
    pub fn dismiss_next_action(&self, id: &str, now: DateTime<Utc>) -> Result<bool, DbError> {
        let now = ts(now);
        let changed = self.conn.execute(
            "UPDATE next_actions SET status = 'dismissed', dismissed_at = ?1, updated_at = ?1
             WHERE id = ?2 AND status = 'queued'",
            params![now, id],
        )?;
        Ok(changed > 0)
    }

    /// Set the snooze gate on a queued row. Status stays `queued`.
    pub fn snooze_next_action(
        &self,
        id: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE next_actions SET snoozed_until = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'queued'",
            params![ts(until), ts(now), id],
        )?;
        Ok(changed > 0)
    }

    /// Stamp the outcome of the latest delivery attempt on the parent row.
    pub fn record_next_action_execution(
        &self,
        id: &str,
        at: DateTime<Utc>,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        let at = ts(at);
        self.conn.execute(
            "UPDATE next_actions SET last_executed_at = ?1, last_execution_status = ?2,
                last_execution_error = ?3, updated_at = ?1
             WHERE id = ?4",
            params![at, status.as_str(), error, id],
        )?;
        Ok(())
    }

    /// Dedupe keys of every queued row in a scope, snoozed or not.
    pub fn queued_dedupe_keys(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT dedupe_key FROM next_actions
             WHERE entity_type = ?1 AND entity_id = ?2 AND status = 'queued'
             ORDER BY dedupe_key",
        )?;
        let rows = stmt.query_map(params![entity_type, entity_id], |row| row.get(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    /// Rows in a scope, optionally filtered by status, best first.
    pub fn list_next_actions(
        &self,
        entity_type: &str,
        entity_id: &str,
        status: Option<ActionStatus>,
    ) -> Result<Vec<DbNextAction>, DbError> {
        let sql = format!(
            "SELECT {NEXT_ACTION_COLUMNS} FROM next_actions
             WHERE entity_type = ?1 AND entity_id = ?2
               AND (?3 IS NULL OR status = ?3)
             ORDER BY score DESC, dedupe_key ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![entity_type, entity_id, status.map(|s| s.as_str())],
            Self::map_next_action_row,
        )?;
        let mut actions = Vec::new();
        for row in rows {
            actions.push(row?);
        }
        Ok(actions)
    }

    /// Queued rows whose snooze (if any) has passed, best first.
    pub fn list_active_next_actions(
        &self,
        entity_type: &str,
        entity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DbNextAction>, DbError> {
        let sql = format!(
            "SELECT {NEXT_ACTION_COLUMNS} FROM next_actions
             WHERE entity_type = ?1 AND entity_id = ?2 AND status = 'queued'
               AND (snoozed_until IS NULL OR snoozed_until <= ?3)
             ORDER BY score DESC, dedupe_key ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![entity_type, entity_id, ts(now)], Self::map_next_action_row)?;
        let mut actions = Vec::new();
        for row in rows {
            actions.push(row?);
        }
        Ok(actions)
    }

    /// Count rows per status in a scope. Snoozed rows are counted apart from queued.
    pub fn count_next_actions_by_status(
        &self,
        entity_type: &str,
        entity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StatusCounts, DbError> {
        let counts = self.conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN status = 'queued'
                    AND (snoozed_until IS NULL OR snoozed_until <= ?3) THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'queued'
                    AND snoozed_until > ?3 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'done' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'dismissed' THEN 1 ELSE 0 END), 0)
             FROM next_actions
             WHERE entity_type = ?1 AND entity_id = ?2",
            params![entity_type, entity_id, ts(now)],
            |row| {
                Ok(StatusCounts {
                    queued: row.get(0)?,
                    snoozed: row.get(1)?,
                    done: row.get(2)?,
                    dismissed: row.get(3)?,
                })
            },
        )?;
        Ok(counts)
    }

    pub(crate) fn map_next_action_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbNextAction> {
        let priority: String = row.get(4)?;
        let breakdown: Option<String> = row.get(6)?;
        let status: String = row.get(7)?;
        let payload: Option<String> = row.get(12)?;
        Ok(DbNextAction {
            id: row.get(0)?,
            dedupe_key: row.get(1)?,
            title: row.get(2)?,
            reason: row.get(3)?,
            priority: Priority::from_str_lossy(&priority),
            score: row.get(5)?,
            score_breakdown: breakdown.and_then(|s| serde_json::from_str(&s).ok()),
            status: ActionStatus::from_str_lossy(&status),
            snoozed_until: row.get(8)?,
            source_type: row.get(9)?,
            source_id: row.get(10)?,
            action_url: row.get(11)?,
            payload: json_column(payload),
            entity_type: row.get(13)?,
            entity_id: row.get(14)?,
            created_by_rule: row.get(15)?,
            last_executed_at: row.get(16)?,
            last_execution_status: row.get(17)?,
            last_execution_error: row.get(18)?,
            created_at: row.get(19)?,
            updated_at: row.get(20)?,
            completed_at: row.get(21)?,
            dismissed_at: row.get(22)?,
        })
    }
}
