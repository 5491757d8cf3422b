use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use super::types::json_column;
use super::*;

/// Run columns plus the per-key pass counter and first pass time, counted in
/// insertion order.
const RUN_SELECT: &str = "SELECT r.id, r.run_key, r.mode, r.entity_type, r.entity_id, r.meta, r.ran_at,
        (SELECT COUNT(*) FROM next_action_runs p
         WHERE p.run_key = r.run_key AND p.rowid <= r.rowid),
        (SELECT MIN(p.ran_at) FROM next_action_runs p WHERE p.run_key = r.run_key)
     FROM next_action_runs r";

impl ActionDb {
    // =========================================================================
    // Evaluation run bookkeeping (append-only)
    // =========================================================================

    /// Append one evaluation pass under `run_key`.
    ///
    /// Passes in the same logical period share a key; each keeps its own row
    /// and meta. The returned row's `run_count` counts passes under the key.
    pub fn record_run(
        &self,
        run_key: &str,
        mode: &str,
        entity_type: &str,
        entity_id: &str,
        meta: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<DbRun, DbError> {
        let id = format!("nbr-{}", Uuid::new_v4());
        self.conn.execute(
            "INSERT INTO next_action_runs (id, run_key, mode, entity_type, entity_id, meta, ran_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id, run_key, mode, entity_type, entity_id, meta.to_string(), ts(now)],
        )?;

        let run = self.conn.query_row(
            &format!("{RUN_SELECT} WHERE r.id = ?1"),
            params![id],
            Self::map_run_row,
        )?;
        Ok(run)
    }

    /// Every pass recorded under `run_key`, oldest first.
    pub fn list_runs(&self, run_key: &str) -> Result<Vec<DbRun>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{RUN_SELECT} WHERE r.run_key = ?1 ORDER BY r.rowid"))?;
        let rows = stmt.query_map(params![run_key], Self::map_run_row)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    fn map_run_row(row: &rusqlite::Row) -> Result<DbRun, rusqlite::Error> {
        Ok(DbRun {
            id: row.get(0)?,
            run_key: row.get(1)?,
            mode: row.get(2)?,
            entity_type: row.get(3)?,
            entity_id: row.get(4)?,
            meta: json_column(row.get(5)?),
            ran_at: row.get(6)?,
            run_count: row.get(7)?,
            first_run_at: row.get(8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::db::test_utils::test_db;

    const KEY: &str = "command_center:cc:scheduled:2026-03-02T09";

    #[test]
    fn test_repeated_run_key_keeps_every_pass() {
        let db = test_db();
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 15, 0).unwrap();
        let first = db
            .record_run(KEY, "scheduled", "command_center", "cc", &serde_json::json!({"created": 3}), at)
            .unwrap();
        assert_eq!(first.run_count, 1);

        let second = db
            .record_run(KEY, "scheduled", "command_center", "cc",
                &serde_json::json!({"created": 0}), at + Duration::minutes(10))
            .unwrap();
        assert_eq!(second.run_count, 2);
        assert_ne!(second.id, first.id);
        assert_eq!(second.first_run_at, first.ran_at);
        assert_eq!(second.meta["created"], 0);

        let runs = db.list_runs(KEY).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].meta["created"], 3, "earlier pass keeps its own meta");
        assert_eq!(runs[0].run_count, 1);
        assert_eq!(runs[1].run_count, 2);
        assert!(db.list_runs("command_center:cc:scheduled:2026-03-02T10").unwrap().is_empty());
    }
}
