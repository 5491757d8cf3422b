//! Queue service: the only writer of `next_actions`.
//!
//! Upsert creates a row per new dedupe key and refreshes open rows in place.
//! Terminal rows (`done`, `dismissed`) are never touched by re-evaluation;
//! only the explicit lifecycle calls below change status.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{ActionDb, DbNextAction, DbRun};
use crate::error::NbaError;
use crate::types::{ActionStatus, Priority, RankedCandidate, RunMode, Scope};

/// Per-pass upsert outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSummary {
    pub created: usize,
    pub updated: usize,
    /// Terminal or snoozed rows left alone.
    pub skipped: usize,
    /// Candidates whose write failed. Logged, never fatal to the batch.
    pub failed: usize,
}

/// Result of a lifecycle call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub id: String,
    pub status: ActionStatus,
    /// False when the row was already terminal and the call was a no-op.
    pub changed: bool,
}

/// Dashboard summary for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub queued: i64,
    pub snoozed: i64,
    pub done: i64,
    pub dismissed: i64,
    pub top_priority: Option<Priority>,
}

enum UpsertOutcome {
    Created,
    Updated,
    Skipped,
}

/// Persist ranked candidates, one independent write per candidate.
pub fn upsert_candidates(
    db: &ActionDb,
    ranked: &[RankedCandidate],
    now: DateTime<Utc>,
) -> UpsertSummary {
    let mut summary = UpsertSummary::default();
    for item in ranked {
        match upsert_one(db, item, now) {
            Ok(UpsertOutcome::Created) => summary.created += 1,
            Ok(UpsertOutcome::Updated) => summary.updated += 1,
            Ok(UpsertOutcome::Skipped) => summary.skipped += 1,
            Err(e) => {
                log::warn!("Upsert failed for {}: {}", item.candidate.dedupe_key, e);
                summary.failed += 1;
            }
        }
    }
    summary
}

fn upsert_one(
    db: &ActionDb,
    ranked: &RankedCandidate,
    now: DateTime<Utc>,
) -> Result<UpsertOutcome, NbaError> {
    let Some(existing) = db.get_next_action_by_dedupe_key(&ranked.candidate.dedupe_key)? else {
        db.insert_next_action(ranked, now)?;
        return Ok(UpsertOutcome::Created);
    };
    if existing.status.is_terminal() || existing.is_snoozed(now) {
        return Ok(UpsertOutcome::Skipped);
    }
    // Guarded write: a completion that landed after the read wins.
    if db.refresh_queued_next_action(ranked, now)? {
        Ok(UpsertOutcome::Updated)
    } else {
        Ok(UpsertOutcome::Skipped)
    }
}

fn require_action(db: &ActionDb, id: &str) -> Result<DbNextAction, NbaError> {
    db.get_next_action(id)?
        .ok_or_else(|| NbaError::NotFound(id.to_string()))
}

fn transition(db: &ActionDb, id: &str, changed: bool) -> Result<Transition, NbaError> {
    let row = require_action(db, id)?;
    Ok(Transition {
        id: row.id,
        status: row.status,
        changed,
    })
}

/// Mark a queued row `done`.
pub fn complete(db: &ActionDb, id: &str, now: DateTime<Utc>) -> Result<Transition, NbaError> {
    require_action(db, id)?;
    let changed = db.complete_next_action(id, now)?;
    if changed {
        log::info!("Completed next action {}", id);
    }
    transition(db, id, changed)
}

/// Mark a queued row `dismissed`.
pub fn dismiss(db: &ActionDb, id: &str, now: DateTime<Utc>) -> Result<Transition, NbaError> {
    require_action(db, id)?;
    let changed = db.dismiss_next_action(id, now)?;
    if changed {
        log::info!("Dismissed next action {}", id);
    }
    transition(db, id, changed)
}

/// Hide a queued row until `until`. Status stays `queued`.
pub fn snooze(
    db: &ActionDb,
    id: &str,
    until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Transition, NbaError> {
    require_action(db, id)?;
    let changed = db.snooze_next_action(id, until, now)?;
    transition(db, id, changed)
}

/// Key shared by every pass over the same scope and mode within one hour.
pub fn run_key(scope: &Scope, mode: RunMode, now: DateTime<Utc>) -> String {
    format!(
        "{}:{}:{}:{}",
        scope.entity_type(),
        scope.entity_id,
        mode.as_str(),
        now.format("%Y-%m-%dT%H")
    )
}

/// Append an evaluation pass to the run ledger.
pub fn record_run(
    db: &ActionDb,
    scope: &Scope,
    mode: RunMode,
    meta: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<DbRun, NbaError> {
    let key = run_key(scope, mode, now);
    Ok(db.record_run(&key, mode.as_str(), scope.entity_type(), &scope.entity_id, meta, now)?)
}

/// Queued rows not snoozed into the future, best first.
pub fn list_active(
    db: &ActionDb,
    scope: &Scope,
    now: DateTime<Utc>,
) -> Result<Vec<DbNextAction>, NbaError> {
    Ok(db.list_active_next_actions(scope.entity_type(), &scope.entity_id, now)?)
}

/// Rows in a scope with the given status, or all rows for `None`.
pub fn list_by_status(
    db: &ActionDb,
    scope: &Scope,
    status: Option<ActionStatus>,
) -> Result<Vec<DbNextAction>, NbaError> {
    Ok(db.list_next_actions(scope.entity_type(), &scope.entity_id, status)?)
}

pub fn summary(db: &ActionDb, scope: &Scope, now: DateTime<Utc>) -> Result<QueueSummary, NbaError> {
    let counts = db.count_next_actions_by_status(scope.entity_type(), &scope.entity_id, now)?;
    let top_priority = list_active(db, scope, now)?
        .iter()
        .map(|row| row.priority)
        .max_by_key(|p| p.severity());
    Ok(QueueSummary {
        queued: counts.queued,
        snoozed: counts.snoozed,
        done: counts.done,
        dismissed: counts.dismissed,
        top_priority,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::db::test_utils::test_db;
    use crate::nba::context::NextActionContext;
    use crate::nba::ranking::rank;
    use crate::nba::rules::evaluate;
    use crate::types::ScoreBand;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn pass(scope: &Scope, failed: i64) -> Vec<RankedCandidate> {
        let ctx = NextActionContext {
            command_center_band: ScoreBand::Critical,
            failed_delivery_count: failed,
            overdue_reminders_count: 1,
            ..NextActionContext::empty(scope.clone())
        };
        rank(evaluate(&ctx, scope), &HashSet::new())
    }

    fn row_for(db: &ActionDb, rule: &str) -> DbNextAction {
        db.get_next_action_by_dedupe_key(&format!("nba:{rule}:command_center:cc-1"))
            .unwrap()
            .expect("row")
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let db = test_db();
        let scope = Scope::command_center("cc-1");

        let first = upsert_candidates(&db, &pass(&scope, 2), now());
        assert_eq!(first, UpsertSummary { created: 3, ..Default::default() });

        let second = upsert_candidates(&db, &pass(&scope, 2), now() + Duration::minutes(5));
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 3);
        assert_eq!(list_active(&db, &scope, now()).unwrap().len(), 3);
    }

    #[test]
    fn test_one_failing_candidate_does_not_block_the_rest() {
        let db = test_db();
        let scope = Scope::command_center("cc-1");
        db.conn_ref()
            .execute_batch(
                "CREATE TRIGGER reject_failed_deliveries BEFORE INSERT ON next_actions
                 WHEN NEW.dedupe_key = 'nba:failed_notification_deliveries:command_center:cc-1'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let summary = upsert_candidates(&db, &pass(&scope, 2), now());
        assert_eq!(summary, UpsertSummary { created: 2, failed: 1, ..Default::default() });

        let rules: Vec<String> = list_active(&db, &scope, now())
            .unwrap()
            .into_iter()
            .map(|row| row.created_by_rule)
            .collect();
        assert_eq!(rules, vec!["score_in_critical_band", "overdue_reminders_high_priority"]);
    }

    #[test]
    fn test_upsert_refreshes_open_rows() {
        let db = test_db();
        let scope = Scope::command_center("cc-1");
        upsert_candidates(&db, &pass(&scope, 1), now());
        let before = row_for(&db, "failed_notification_deliveries");

        upsert_candidates(&db, &pass(&scope, 4), now() + Duration::minutes(5));
        let after = row_for(&db, "failed_notification_deliveries");
        assert_eq!(after.id, before.id);
        assert!(after.score > before.score);
        assert_ne!(after.title, before.title);
    }

    #[test]
    fn test_terminal_rows_are_never_refreshed() {
        let db = test_db();
        let scope = Scope::command_center("cc-1");
        upsert_candidates(&db, &pass(&scope, 1), now());
        let done = row_for(&db, "failed_notification_deliveries");
        let dismissed = row_for(&db, "overdue_reminders_high_priority");
        complete(&db, &done.id, now()).unwrap();
        dismiss(&db, &dismissed.id, now()).unwrap();

        let summary = upsert_candidates(&db, &pass(&scope, 9), now() + Duration::hours(1));
        assert_eq!(summary.created, 0);
        assert_eq!(summary.skipped, 2);

        let done_after = row_for(&db, "failed_notification_deliveries");
        assert_eq!(done_after.status, ActionStatus::Done);
        assert_eq!(done_after.score, done.score);
        assert_eq!(done_after.title, done.title);
        assert_eq!(
            row_for(&db, "overdue_reminders_high_priority").status,
            ActionStatus::Dismissed
        );
    }

    #[test]
    fn test_lifecycle_calls() {
        let db = test_db();
        let scope = Scope::command_center("cc-1");
        upsert_candidates(&db, &pass(&scope, 1), now());
        let row = row_for(&db, "score_in_critical_band");

        let t = complete(&db, &row.id, now()).unwrap();
        assert!(t.changed);
        assert_eq!(t.status, ActionStatus::Done);

        let again = dismiss(&db, &row.id, now()).unwrap();
        assert!(!again.changed, "terminal rows do not re-open or switch");
        assert_eq!(again.status, ActionStatus::Done);

        assert!(matches!(complete(&db, "nba-missing", now()), Err(NbaError::NotFound(_))));
    }

    #[test]
    fn test_snoozed_rows_are_hidden_and_frozen() {
        let db = test_db();
        let scope = Scope::command_center("cc-1");
        upsert_candidates(&db, &pass(&scope, 1), now());
        let row = row_for(&db, "failed_notification_deliveries");

        let t = snooze(&db, &row.id, now() + Duration::hours(24), now()).unwrap();
        assert_eq!(t.status, ActionStatus::Queued);
        assert_eq!(list_active(&db, &scope, now()).unwrap().len(), 2);

        let during = upsert_candidates(&db, &pass(&scope, 5), now() + Duration::hours(1));
        assert_eq!(during.skipped, 1);
        assert_eq!(row_for(&db, "failed_notification_deliveries").score, row.score);

        let after = upsert_candidates(&db, &pass(&scope, 5), now() + Duration::hours(25));
        assert_eq!(after.updated, 3);
        assert!(row_for(&db, "failed_notification_deliveries").score > row.score);

        let s = summary(&db, &scope, now() + Duration::hours(2)).unwrap();
        assert_eq!((s.queued, s.snoozed), (2, 1));
        assert_eq!(s.top_priority, Some(Priority::Critical));
    }

    #[test]
    fn test_run_key_buckets_by_hour() {
        let db = test_db();
        let scope = Scope::command_center("cc-1");
        assert_eq!(
            run_key(&scope, RunMode::Scheduled, now()),
            "command_center:cc-1:scheduled:2026-03-02T09"
        );

        let first = record_run(&db, &scope, RunMode::Manual, &serde_json::json!({ "created": 3 }), now())
            .unwrap();
        let run = record_run(
            &db,
            &scope,
            RunMode::Manual,
            &serde_json::json!({ "created": 0 }),
            now() + Duration::minutes(20),
        )
        .unwrap();
        assert_eq!(run.run_count, 2);
        assert_eq!(run.run_key, first.run_key);

        let passes = db.list_runs(&first.run_key).unwrap();
        assert_eq!(
            passes.iter().map(|r| r.meta["created"].as_i64()).collect::<Vec<_>>(),
            vec![Some(3), Some(0)]
        );

        let next_hour = record_run(
            &db,
            &scope,
            RunMode::Manual,
            &serde_json::json!({ "created": 1 }),
            now() + Duration::hours(1),
        )
        .unwrap();
        assert_eq!(next_hour.run_count, 1);
    }
}
