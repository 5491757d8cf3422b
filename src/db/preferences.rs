use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use super::*;

/// What a new suppression record targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressionTarget<'a> {
    Rule(&'a str),
    DedupeKey(&'a str),
}

impl ActionDb {
    // =========================================================================
    // Preferences (suppressions)
    // =========================================================================

    /// Insert an active suppression for a scope. `until = None` never expires.
    pub fn insert_preference(
        &self,
        entity_type: &str,
        entity_id: &str,
        target: SuppressionTarget<'_>,
        until: Option<DateTime<Utc>>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<String, DbError> {
        let id = format!("nbp-{}", Uuid::new_v4());
        let (rule_key, dedupe_key) = match target {
            SuppressionTarget::Rule(rule) => (Some(rule), None),
            SuppressionTarget::DedupeKey(key) => (None, Some(key)),
        };
        let now = ts(now);
        self.conn.execute(
            "INSERT INTO next_action_preferences (
                id, entity_type, entity_id, rule_key, dedupe_key, status,
                suppressed_until, reason, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?7, ?8, ?8)",
            params![
                id,
                entity_type,
                entity_id,
                rule_key,
                dedupe_key,
                until.map(ts),
                reason,
                now,
            ],
        )?;
        Ok(id)
    }

    /// Revoke a suppression. Returns false if it was already revoked or missing.
    pub fn revoke_preference(&self, id: &str, now: DateTime<Utc>) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE next_action_preferences SET status = 'revoked', updated_at = ?1
             WHERE id = ?2 AND status = 'active'",
            params![ts(now), id],
        )?;
        Ok(changed > 0)
    }

    /// Active, unexpired suppressions for a scope.
    pub fn active_preferences(
        &self,
        entity_type: &str,
        entity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DbPreference>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_type, entity_id, rule_key, dedupe_key, status,
                    suppressed_until, reason, created_at, updated_at
             FROM next_action_preferences
             WHERE entity_type = ?1 AND entity_id = ?2 AND status = 'active'
               AND (suppressed_until IS NULL OR suppressed_until > ?3)
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![entity_type, entity_id, ts(now)], |row| {
            Ok(DbPreference {
                id: row.get(0)?,
                entity_type: row.get(1)?,
                entity_id: row.get(2)?,
                rule_key: row.get(3)?,
                dedupe_key: row.get(4)?,
                status: row.get(5)?,
                suppressed_until: row.get(6)?,
                reason: row.get(7)?,
                created_at: row.get(8)?,
                updated_at: row.get(9)?,
            })
        })?;
        let mut prefs = Vec::new();
        for row in rows {
            prefs.push(row?);
        }
        Ok(prefs)
    }
}
