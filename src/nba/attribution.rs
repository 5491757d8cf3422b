//! Before/after attribution for executed actions.
//!
//! A snapshot is three summary numbers for the scope. The delta is a plain
//! structural diff and the outcome a sign vote over it, so any record can be
//! checked by hand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::ActionDb;
use crate::error::NbaError;
use crate::signals::SignalSource;
use crate::types::{EngineConfig, Outcome, Scope, ScoreBand};

use super::context::build_context;

/// Actions whose effect is measured.
pub const ATTRIBUTION_ACTIONS: &[&str] =
    &["mark_done", "recompute_score", "run_next_actions", "run_risk_rules"];

pub fn is_attribution_relevant(action_key: &str) -> bool {
    ATTRIBUTION_ACTIONS.contains(&action_key)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionSnapshot {
    pub score_band: ScoreBand,
    /// Failed deliveries plus overdue reminders, retention and handoffs.
    pub risk_count: i64,
    /// Queued, unsnoozed rows in the scope.
    pub queued_count: i64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionDelta {
    /// Band movement in health steps. Positive is healthier. Zero when
    /// either side is unknown.
    pub score_delta: i32,
    pub risk_delta: i64,
    pub nba_delta: i64,
}

/// Capture the scope's summary signals.
pub async fn capture_snapshot(
    db: &ActionDb,
    source: &dyn SignalSource,
    scope: &Scope,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<AttributionSnapshot, NbaError> {
    let ctx = build_context(source, scope, config, now).await;
    let counts = db.count_next_actions_by_status(scope.entity_type(), &scope.entity_id, now)?;
    Ok(AttributionSnapshot {
        score_band: ctx.command_center_band,
        risk_count: ctx.risk_count(),
        queued_count: counts.queued,
        captured_at: now,
    })
}

pub fn delta(before: &AttributionSnapshot, after: &AttributionSnapshot) -> AttributionDelta {
    let score_delta = match (before.score_band.health_rank(), after.score_band.health_rank()) {
        (Some(b), Some(a)) => a - b,
        _ => 0,
    };
    AttributionDelta {
        score_delta,
        risk_delta: after.risk_count - before.risk_count,
        nba_delta: after.queued_count - before.queued_count,
    }
}

/// Healthier band, fewer risks and a shorter queue each vote +1.
pub fn to_outcome(delta: &AttributionDelta) -> Outcome {
    let vote = delta.score_delta.signum() as i64 - delta.risk_delta.signum() - delta.nba_delta.signum();
    match vote {
        v if v > 0 => Outcome::Improved,
        v if v < 0 => Outcome::Worsened,
        _ => Outcome::Neutral,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::db::test_utils::test_db;
    use crate::signals::{CountSignal, StaticSignalSource};

    fn snap(band: ScoreBand, risk: i64, queued: i64) -> AttributionSnapshot {
        AttributionSnapshot {
            score_band: band,
            risk_count: risk,
            queued_count: queued,
            captured_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_delta_and_outcome() {
        let before = snap(ScoreBand::Critical, 4, 3);

        let better = delta(&before, &snap(ScoreBand::AtRisk, 2, 2));
        assert_eq!(
            better,
            AttributionDelta { score_delta: 1, risk_delta: -2, nba_delta: -1 }
        );
        assert_eq!(to_outcome(&better), Outcome::Improved);

        let same = delta(&before, &before);
        assert_eq!(to_outcome(&same), Outcome::Neutral);

        let worse = delta(&before, &snap(ScoreBand::Critical, 6, 3));
        assert_eq!(to_outcome(&worse), Outcome::Worsened);

        // Queue shrank but risk grew: votes cancel.
        let mixed = delta(&before, &snap(ScoreBand::Critical, 5, 2));
        assert_eq!(to_outcome(&mixed), Outcome::Neutral);
    }

    #[test]
    fn test_unknown_band_does_not_vote() {
        let d = delta(&snap(ScoreBand::Unknown, 1, 1), &snap(ScoreBand::Healthy, 1, 1));
        assert_eq!(d.score_delta, 0);
        assert_eq!(to_outcome(&d), Outcome::Neutral);
    }

    #[test]
    fn test_relevant_actions() {
        assert!(is_attribution_relevant("mark_done"));
        assert!(is_attribution_relevant("run_risk_rules"));
        assert!(!is_attribution_relevant("snooze_1d"));
    }

    #[tokio::test]
    async fn test_capture_snapshot_reads_signals_and_queue() {
        let db = test_db();
        let source = StaticSignalSource::new()
            .with_band(ScoreBand::Watch)
            .with_count(CountSignal::FailedDeliveries, 2)
            .with_count(CountSignal::RetentionOverdue, 1)
            .with_count(CountSignal::StalledContacts, 8);
        let scope = Scope::command_center("cc-1");
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();

        let s = capture_snapshot(&db, &source, &scope, &EngineConfig::default(), now)
            .await
            .unwrap();
        assert_eq!(s.score_band, ScoreBand::Watch);
        assert_eq!(s.risk_count, 3);
        assert_eq!(s.queued_count, 0);
    }
}
