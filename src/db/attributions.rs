use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::types::Outcome;

use super::types::json_column;
use super::*;

/// Fields of an attribution record before it is written.
#[derive(Debug, Clone)]
pub struct NewAttribution<'a> {
    pub execution_id: &'a str,
    pub next_action_id: &'a str,
    pub actor_id: Option<&'a str>,
    pub source_type: &'a str,
    pub rule_key: Option<&'a str>,
    pub action_key: &'a str,
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub before: &'a serde_json::Value,
    pub after: &'a serde_json::Value,
    pub delta: &'a serde_json::Value,
    pub outcome: Outcome,
}

impl ActionDb {
    // =========================================================================
    // Attribution records
    // =========================================================================

    /// Write the attribution for one execution. One record per execution.
    pub fn insert_attribution(
        &self,
        record: &NewAttribution<'_>,
        now: DateTime<Utc>,
    ) -> Result<String, DbError> {
        let id = format!("nbt-{}", Uuid::new_v4());
        self.conn.execute(
            "INSERT INTO next_action_attributions (
                id, execution_id, next_action_id, actor_id, source_type, rule_key, action_key,
                entity_type, entity_id, before_json, after_json, delta_json, outcome, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                id,
                record.execution_id,
                record.next_action_id,
                record.actor_id,
                record.source_type,
                record.rule_key,
                record.action_key,
                record.entity_type,
                record.entity_id,
                record.before.to_string(),
                record.after.to_string(),
                record.delta.to_string(),
                record.outcome.as_str(),
                ts(now),
            ],
        )?;
        Ok(id)
    }

    /// Attribution records for one queue row, newest first.
    pub fn list_attributions(&self, next_action_id: &str) -> Result<Vec<DbAttribution>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, execution_id, next_action_id, actor_id, source_type, rule_key, action_key,
                    entity_type, entity_id, before_json, after_json, delta_json, outcome, created_at
             FROM next_action_attributions
             WHERE next_action_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![next_action_id], |row| {
            let outcome: String = row.get(12)?;
            Ok(DbAttribution {
                id: row.get(0)?,
                execution_id: row.get(1)?,
                next_action_id: row.get(2)?,
                actor_id: row.get(3)?,
                source_type: row.get(4)?,
                rule_key: row.get(5)?,
                action_key: row.get(6)?,
                entity_type: row.get(7)?,
                entity_id: row.get(8)?,
                before: json_column(row.get(9)?),
                after: json_column(row.get(10)?),
                delta: json_column(row.get(11)?),
                outcome: Outcome::from_str_lossy(&outcome),
                created_at: row.get(13)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}
