//! Signal source backed by the `signal_snapshots` table.
//!
//! Collaborators publish their latest counts, bands and activity timestamps
//! into the same SQLite file the queue lives in; the engine reads them here
//! through its own connection so it never contends with the queue writer's
//! borrow of `ActionDb`.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{parse_ts, ts};
use crate::types::{Scope, ScoreBand};

use super::{CountSignal, SignalError, SignalSource, LAST_ACTIVITY_KEY, SCORE_BAND_KEY};

type SnapshotRow = (Option<i64>, Option<String>, String);

#[derive(Clone)]
pub struct SnapshotSignalSource {
    conn: Arc<Mutex<Connection>>,
}

impl SnapshotSignalSource {
    /// Open the snapshot store at `path`, applying the schema if needed.
    pub fn open(path: &Path) -> Result<Self, SignalError> {
        let conn = Connection::open(path)
            .map_err(|e| SignalError::unavailable("snapshot_store", e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| SignalError::unavailable("snapshot_store", e.to_string()))?;
        crate::migrations::run_migrations(&conn)
            .map_err(|e| SignalError::unavailable("snapshot_store", e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Publish the latest value of a count signal.
    pub fn publish_count(
        &self,
        scope: &Scope,
        signal: CountSignal,
        value: i64,
        observed_at: DateTime<Utc>,
    ) -> Result<(), SignalError> {
        self.publish(scope, signal.as_str(), Some(value), None, observed_at)
    }

    pub fn publish_band(
        &self,
        scope: &Scope,
        band: ScoreBand,
        observed_at: DateTime<Utc>,
    ) -> Result<(), SignalError> {
        self.publish(scope, SCORE_BAND_KEY, None, Some(band.as_str()), observed_at)
    }

    pub fn publish_last_activity(
        &self,
        scope: &Scope,
        at: DateTime<Utc>,
        observed_at: DateTime<Utc>,
    ) -> Result<(), SignalError> {
        self.publish(scope, LAST_ACTIVITY_KEY, None, Some(&ts(at)), observed_at)
    }

    fn publish(
        &self,
        scope: &Scope,
        key: &str,
        int_value: Option<i64>,
        text_value: Option<&str>,
        observed_at: DateTime<Utc>,
    ) -> Result<(), SignalError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO signal_snapshots (scope_type, scope_id, signal_key, int_value, text_value, observed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(scope_type, scope_id, signal_key) DO UPDATE SET
                    int_value = excluded.int_value,
                    text_value = excluded.text_value,
                    observed_at = excluded.observed_at",
                params![
                    scope.entity_type(),
                    scope.entity_id,
                    key,
                    int_value,
                    text_value,
                    ts(observed_at),
                ],
            )
            .map_err(|e| SignalError::unavailable(key, e.to_string()))?;
        Ok(())
    }

    /// Read one snapshot row on the blocking pool.
    async fn read(&self, scope: &Scope, key: &'static str) -> Result<Option<SnapshotRow>, SignalError> {
        let conn = Arc::clone(&self.conn);
        let scope_type = scope.entity_type();
        let scope_id = scope.entity_id.clone();
        tokio::task::spawn_blocking(move || {
            conn.lock()
                .query_row(
                    "SELECT int_value, text_value, observed_at FROM signal_snapshots
                     WHERE scope_type = ?1 AND scope_id = ?2 AND signal_key = ?3",
                    params![scope_type, scope_id, key],
                    |row| -> rusqlite::Result<SnapshotRow> {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    },
                )
                .optional()
                .map_err(|e| SignalError::unavailable(key, e.to_string()))
        })
        .await
        .map_err(|e| SignalError::unavailable(key, format!("snapshot read task failed: {e}")))?
    }
}

#[async_trait::async_trait]
impl SignalSource for SnapshotSignalSource {
    async fn score_band(&self, scope: &Scope) -> Result<ScoreBand, SignalError> {
        let row = self.read(scope, SCORE_BAND_KEY).await?;
        Ok(row
            .and_then(|(_, text, _)| text)
            .map(|band| ScoreBand::from_str_lossy(&band))
            .unwrap_or_default())
    }

    async fn count(
        &self,
        scope: &Scope,
        signal: CountSignal,
        since: DateTime<Utc>,
    ) -> Result<i64, SignalError> {
        let Some((value, _, observed_at)) = self.read(scope, signal.as_str()).await? else {
            return Ok(0);
        };
        if signal.is_windowed() {
            let observed = parse_ts(&observed_at).ok_or_else(|| SignalError::Malformed {
                signal: signal.as_str().to_string(),
                message: format!("bad observed_at {observed_at}"),
            })?;
            if observed < since {
                return Ok(0);
            }
        }
        Ok(value.unwrap_or(0).max(0))
    }

    async fn last_activity_at(&self, scope: &Scope) -> Result<Option<DateTime<Utc>>, SignalError> {
        let row = self.read(scope, LAST_ACTIVITY_KEY).await?;
        match row.and_then(|(_, text, _)| text) {
            None => Ok(None),
            Some(raw) => parse_ts(&raw).map(Some).ok_or_else(|| SignalError::Malformed {
                signal: LAST_ACTIVITY_KEY.to_string(),
                message: format!("bad timestamp {raw}"),
            }),
        }
    }
}
