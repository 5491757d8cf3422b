use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ActionStatus, Candidate, ExecutionStatus, Outcome, Priority, ScoreBreakdown};

use super::parse_ts;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Malformed JSON column: {0}")]
    Json(#[from] serde_json::Error),
}

/// A row from the `next_actions` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbNextAction {
    pub id: String,
    pub dedupe_key: String,
    pub title: String,
    pub reason: String,
    pub priority: Priority,
    pub score: i32,
    pub score_breakdown: Option<ScoreBreakdown>,
    pub status: ActionStatus,
    pub snoozed_until: Option<String>,
    pub source_type: String,
    pub source_id: Option<String>,
    pub action_url: Option<String>,
    pub payload: serde_json::Value,
    pub entity_type: String,
    pub entity_id: String,
    pub created_by_rule: String,
    pub last_executed_at: Option<String>,
    pub last_execution_status: Option<String>,
    pub last_execution_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub dismissed_at: Option<String>,
}

impl DbNextAction {
    /// Queued but gated behind a snooze that has not passed yet.
    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.status == ActionStatus::Queued
            && self
                .snoozed_until
                .as_deref()
                .and_then(parse_ts)
                .is_some_and(|until| until > now)
    }

    /// Visible in "active" views: queued and not snoozed into the future.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == ActionStatus::Queued && !self.is_snoozed(now)
    }
}

/// A row from the `next_action_preferences` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbPreference {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub rule_key: Option<String>,
    pub dedupe_key: Option<String>,
    pub status: String,
    pub suppressed_until: Option<String>,
    pub reason: String,
    pub created_at: String,
    pub updated_at: String,
}

impl DbPreference {
    /// `status=active` and either open-ended or expiring in the future.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.status != "active" {
            return false;
        }
        match self.suppressed_until.as_deref() {
            None => true,
            Some(until) => parse_ts(until).is_some_and(|until| until > now),
        }
    }

    /// Matches on the producing rule or on the exact dedupe key.
    pub fn matches(&self, candidate: &Candidate) -> bool {
        self.rule_key.as_deref() == Some(candidate.created_by_rule.as_str())
            || self.dedupe_key.as_deref() == Some(candidate.dedupe_key.as_str())
    }
}

/// A row from the append-only `next_action_executions` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbExecution {
    pub id: String,
    pub next_action_id: String,
    pub action_key: String,
    pub idempotency_key: Option<String>,
    pub actor_id: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: String,
    pub finished_at: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub meta: serde_json::Value,
}

/// A row from the `next_action_attributions` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAttribution {
    pub id: String,
    pub execution_id: String,
    pub next_action_id: String,
    pub actor_id: Option<String>,
    pub source_type: String,
    pub rule_key: Option<String>,
    pub action_key: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
    pub delta: serde_json::Value,
    pub outcome: Outcome,
    pub created_at: String,
}

/// A row from the `next_action_runs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbRun {
    pub id: String,
    pub run_key: String,
    pub mode: String,
    pub entity_type: String,
    pub entity_id: String,
    pub meta: serde_json::Value,
    pub ran_at: String,
    /// Passes recorded under `run_key` up to and including this one.
    pub run_count: i64,
    /// When the first pass under `run_key` ran.
    pub first_run_at: String,
}

/// Parse a JSON text column, treating malformed content as `{}`.
pub(crate) fn json_column(raw: Option<String>) -> serde_json::Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_else(|| serde_json::json!({}))
}
