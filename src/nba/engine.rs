//! One evaluation pass: aggregate, evaluate, filter, rank, upsert, record.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::db::ActionDb;
use crate::error::NbaError;
use crate::signals::SignalSource;
use crate::types::{EngineConfig, RunMode, Scope};

use super::context::build_context;
use super::preferences::filter_suppressed;
use super::queue::{record_run, upsert_candidates, UpsertSummary};
use super::ranking::rank;
use super::rules::{evaluate_with, RuleSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub scope: Scope,
    pub run_key: String,
    pub run_count: i64,
    /// Candidates emitted by the rules before suppression.
    pub evaluated: usize,
    pub suppressed: usize,
    #[serde(flatten)]
    pub summary: UpsertSummary,
    /// Signals that could not be fetched and were defaulted.
    pub degraded: Vec<String>,
}

/// Run a full pass for `scope` and persist the result.
pub async fn evaluate_and_upsert(
    db: &ActionDb,
    source: &dyn SignalSource,
    scope: &Scope,
    mode: RunMode,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<EvaluationReport, NbaError> {
    let ctx = build_context(source, scope, config, now).await;

    let candidates = evaluate_with(&ctx, scope, &RuleSettings::from(config));
    let evaluated = candidates.len();
    let candidates = filter_suppressed(db, candidates, scope, now)?;
    let suppressed = evaluated - candidates.len();

    let existing: HashSet<String> = db
        .queued_dedupe_keys(scope.entity_type(), &scope.entity_id)?
        .into_iter()
        .collect();
    let ranked = rank(candidates, &existing);
    let summary = upsert_candidates(db, &ranked, now);

    let meta = json!({
        "evaluated": evaluated,
        "suppressed": suppressed,
        "created": summary.created,
        "updated": summary.updated,
        "skipped": summary.skipped,
        "failed": summary.failed,
        "degraded": ctx.degraded,
    });
    let run = record_run(db, scope, mode, &meta, now)?;

    log::info!(
        "NBA pass {} ({}): {} evaluated, {} suppressed, {} created, {} updated, {} skipped, {} failed",
        scope,
        mode.as_str(),
        evaluated,
        suppressed,
        summary.created,
        summary.updated,
        summary.skipped,
        summary.failed
    );

    Ok(EvaluationReport {
        scope: scope.clone(),
        run_key: run.run_key,
        run_count: run.run_count,
        evaluated,
        suppressed,
        summary,
        degraded: ctx.degraded,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::nba::preferences::suppress_rule;
    use crate::nba::queue::{dismiss, list_active};
    use crate::db::test_utils::test_db;
    use crate::signals::{CountSignal, StaticSignalSource};
    use crate::types::{ActionStatus, ScoreBand};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn source() -> StaticSignalSource {
        StaticSignalSource::new()
            .with_band(ScoreBand::Critical)
            .with_count(CountSignal::FailedDeliveries, 2)
            .with_count(CountSignal::OverdueReminders, 1)
    }

    #[tokio::test]
    async fn test_second_pass_creates_nothing() {
        let db = test_db();
        let scope = Scope::command_center("cc-1");
        let config = EngineConfig::default();

        let first = evaluate_and_upsert(&db, &source(), &scope, RunMode::Manual, &config, now())
            .await
            .unwrap();
        assert_eq!(first.summary.created, 3);
        assert_eq!(first.run_count, 1);

        let later = now() + Duration::minutes(10);
        let second = evaluate_and_upsert(&db, &source(), &scope, RunMode::Manual, &config, later)
            .await
            .unwrap();
        assert_eq!(second.summary.created, 0);
        assert_eq!(second.summary.updated, 3);
        assert_eq!(second.run_key, first.run_key);
        assert_eq!(second.run_count, 2);

        let active = list_active(&db, &scope, later).unwrap();
        let rules: Vec<&str> = active.iter().map(|a| a.created_by_rule.as_str()).collect();
        assert_eq!(
            rules,
            vec![
                "score_in_critical_band",
                "failed_notification_deliveries",
                "overdue_reminders_high_priority"
            ]
        );
    }

    #[tokio::test]
    async fn test_dismissed_row_stays_dismissed() {
        let db = test_db();
        let scope = Scope::command_center("cc-1");
        let config = EngineConfig::default();
        evaluate_and_upsert(&db, &source(), &scope, RunMode::Manual, &config, now())
            .await
            .unwrap();

        let row = db
            .get_next_action_by_dedupe_key("nba:overdue_reminders_high_priority:command_center:cc-1")
            .unwrap()
            .unwrap();
        dismiss(&db, &row.id, now()).unwrap();

        evaluate_and_upsert(&db, &source(), &scope, RunMode::Scheduled, &config, now())
            .await
            .unwrap();
        let row = db.get_next_action(&row.id).unwrap().unwrap();
        assert_eq!(row.status, ActionStatus::Dismissed);
    }

    #[tokio::test]
    async fn test_suppressed_rule_is_skipped_until_expiry() {
        let db = test_db();
        let scope = Scope::command_center("cc-1");
        let config = EngineConfig::default();
        suppress_rule(&db, &scope, "failed_notification_deliveries", 30, "", now()).unwrap();

        let report = evaluate_and_upsert(&db, &source(), &scope, RunMode::Manual, &config, now())
            .await
            .unwrap();
        assert_eq!(report.evaluated, 3);
        assert_eq!(report.suppressed, 1);
        assert_eq!(report.summary.created, 2);

        let later = now() + Duration::days(31);
        let report = evaluate_and_upsert(&db, &source(), &scope, RunMode::Manual, &config, later)
            .await
            .unwrap();
        assert_eq!(report.suppressed, 0);
        assert_eq!(report.summary.created, 1);
    }

    #[tokio::test]
    async fn test_degraded_signals_are_reported() {
        let db = test_db();
        let scope = Scope::command_center("cc-1");
        let source = source().failing("overdue_reminders_count");

        let report =
            evaluate_and_upsert(&db, &source, &scope, RunMode::Manual, &EngineConfig::default(), now())
                .await
                .unwrap();
        assert_eq!(report.degraded, vec!["overdue_reminders_count".to_string()]);
        assert_eq!(report.summary.created, 2);
    }
}
