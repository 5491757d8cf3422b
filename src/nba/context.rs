//! Context aggregation.
//!
//! Fans out one read per signal to the collaborators concurrently, joins, and
//! folds the answers into an immutable [`NextActionContext`]. A failed read
//! degrades to zero / unknown and is listed in `degraded`; it never aborts
//! the pass.

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use serde::Serialize;

use crate::config::window_start;
use crate::signals::{CountSignal, SignalSource, LAST_ACTIVITY_KEY, SCORE_BAND_KEY};
use crate::types::{EngineConfig, Scope, ScopeKind, ScoreBand};

/// Growth-pipeline signals, present only for a user-scoped growth pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthContext {
    pub overdue_follow_up_count: i64,
    pub no_outreach_sent_count: i64,
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Whole days between the last activity and the aggregation time.
    pub days_since_activity: Option<i64>,
}

/// Flat snapshot of operational signals for one scope. No identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextActionContext {
    pub scope: Scope,
    pub command_center_band: ScoreBand,
    pub failed_delivery_count: i64,
    pub overdue_reminders_count: i64,
    pub proposals_missing_follow_up_count: i64,
    pub retention_overdue_count: i64,
    pub handoff_awaiting_confirmation_count: i64,
    pub won_deals_without_delivery_count: i64,
    pub referral_ask_gap_count: i64,
    pub stalled_contact_count: i64,
    pub growth: Option<GrowthContext>,
    /// Signal keys whose fetch failed and were defaulted.
    pub degraded: Vec<String>,
}

impl NextActionContext {
    /// All counts zero, band unknown.
    pub fn empty(scope: Scope) -> Self {
        let growth = (scope.kind == ScopeKind::FounderGrowth).then(GrowthContext::default);
        Self {
            scope,
            command_center_band: ScoreBand::Unknown,
            failed_delivery_count: 0,
            overdue_reminders_count: 0,
            proposals_missing_follow_up_count: 0,
            retention_overdue_count: 0,
            handoff_awaiting_confirmation_count: 0,
            won_deals_without_delivery_count: 0,
            referral_ask_gap_count: 0,
            stalled_contact_count: 0,
            growth,
            degraded: Vec::new(),
        }
    }

    /// Value of a count signal as aggregated.
    pub fn count(&self, signal: CountSignal) -> i64 {
        match signal {
            CountSignal::FailedDeliveries => self.failed_delivery_count,
            CountSignal::OverdueReminders => self.overdue_reminders_count,
            CountSignal::ProposalsMissingFollowUp => self.proposals_missing_follow_up_count,
            CountSignal::RetentionOverdue => self.retention_overdue_count,
            CountSignal::HandoffAwaitingConfirmation => self.handoff_awaiting_confirmation_count,
            CountSignal::WonDealsWithoutDelivery => self.won_deals_without_delivery_count,
            CountSignal::ReferralAskGaps => self.referral_ask_gap_count,
            CountSignal::StalledContacts => self.stalled_contact_count,
            CountSignal::GrowthFollowUpsOverdue => {
                self.growth.as_ref().map_or(0, |g| g.overdue_follow_up_count)
            }
            CountSignal::GrowthNoOutreachSent => {
                self.growth.as_ref().map_or(0, |g| g.no_outreach_sent_count)
            }
        }
    }

    fn set_count(&mut self, signal: CountSignal, value: i64) {
        let value = value.max(0);
        match signal {
            CountSignal::FailedDeliveries => self.failed_delivery_count = value,
            CountSignal::OverdueReminders => self.overdue_reminders_count = value,
            CountSignal::ProposalsMissingFollowUp => self.proposals_missing_follow_up_count = value,
            CountSignal::RetentionOverdue => self.retention_overdue_count = value,
            CountSignal::HandoffAwaitingConfirmation => {
                self.handoff_awaiting_confirmation_count = value
            }
            CountSignal::WonDealsWithoutDelivery => self.won_deals_without_delivery_count = value,
            CountSignal::ReferralAskGaps => self.referral_ask_gap_count = value,
            CountSignal::StalledContacts => self.stalled_contact_count = value,
            CountSignal::GrowthFollowUpsOverdue => {
                if let Some(g) = self.growth.as_mut() {
                    g.overdue_follow_up_count = value;
                }
            }
            CountSignal::GrowthNoOutreachSent => {
                if let Some(g) = self.growth.as_mut() {
                    g.no_outreach_sent_count = value;
                }
            }
        }
    }

    /// Operational risk total used by attribution: failures and overdue work.
    pub fn risk_count(&self) -> i64 {
        self.failed_delivery_count
            + self.overdue_reminders_count
            + self.retention_overdue_count
            + self.handoff_awaiting_confirmation_count
    }
}

/// Pull every signal relevant to `scope` and fold it into a context.
pub async fn build_context(
    source: &dyn SignalSource,
    scope: &Scope,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> NextActionContext {
    let growth_scope = scope.kind == ScopeKind::FounderGrowth;
    let since = match config
        .failed_delivery_window()
        .and_then(|window| window_start(now, window))
    {
        Ok(since) => since,
        Err(e) => {
            log::warn!("{}; counting failed deliveries over the default window", e);
            now - Duration::hours(EngineConfig::default().failed_delivery_window_hours)
        }
    };

    let signals: Vec<CountSignal> = CountSignal::ALL
        .iter()
        .copied()
        .filter(|s| growth_scope || !s.is_growth())
        .collect();

    let counts = join_all(
        signals
            .iter()
            .map(|&signal| async move { (signal, source.count(scope, signal, since).await) }),
    );
    let last_activity = async {
        if growth_scope {
            Some(source.last_activity_at(scope).await)
        } else {
            None
        }
    };

    let (band, counts, last_activity) =
        tokio::join!(source.score_band(scope), counts, last_activity);

    let mut ctx = NextActionContext::empty(scope.clone());

    match band {
        Ok(band) => ctx.command_center_band = band,
        Err(e) => {
            log::warn!("Score band unavailable for {}: {}", scope, e);
            ctx.degraded.push(SCORE_BAND_KEY.to_string());
        }
    }

    for (signal, result) in counts {
        match result {
            Ok(value) => ctx.set_count(signal, value),
            Err(e) => {
                log::warn!("Signal {} unavailable for {}: {}", signal.as_str(), scope, e);
                ctx.degraded.push(signal.as_str().to_string());
            }
        }
    }

    if let (Some(growth), Some(result)) = (ctx.growth.as_mut(), last_activity) {
        match result {
            Ok(at) => {
                growth.last_activity_at = at;
                growth.days_since_activity = at.map(|at| (now - at).num_days().max(0));
            }
            Err(e) => {
                log::warn!("Last activity unavailable for {}: {}", scope, e);
                ctx.degraded.push(LAST_ACTIVITY_KEY.to_string());
            }
        }
    }

    ctx
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::signals::StaticSignalSource;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_builds_command_center_context() {
        let source = StaticSignalSource::new()
            .with_band(ScoreBand::Critical)
            .with_count(CountSignal::FailedDeliveries, 2)
            .with_count(CountSignal::OverdueReminders, 1)
            .with_count(CountSignal::GrowthNoOutreachSent, 9);
        let scope = Scope::command_center("cc-1");

        let ctx = build_context(&source, &scope, &EngineConfig::default(), now()).await;
        assert_eq!(ctx.command_center_band, ScoreBand::Critical);
        assert_eq!(ctx.failed_delivery_count, 2);
        assert_eq!(ctx.overdue_reminders_count, 1);
        assert!(ctx.growth.is_none(), "growth signals only load for a growth scope");
        assert_eq!(ctx.count(CountSignal::GrowthNoOutreachSent), 0);
        assert!(ctx.degraded.is_empty());
    }

    #[tokio::test]
    async fn test_failed_signal_degrades_instead_of_aborting() {
        let source = StaticSignalSource::new()
            .with_band(ScoreBand::Watch)
            .with_count(CountSignal::OverdueReminders, 3)
            .failing("failed_delivery_count")
            .failing(SCORE_BAND_KEY);
        let scope = Scope::command_center("cc-1");

        let ctx = build_context(&source, &scope, &EngineConfig::default(), now()).await;
        assert_eq!(ctx.command_center_band, ScoreBand::Unknown);
        assert_eq!(ctx.failed_delivery_count, 0);
        assert_eq!(ctx.overdue_reminders_count, 3);
        assert_eq!(
            ctx.degraded,
            vec![SCORE_BAND_KEY.to_string(), "failed_delivery_count".to_string()]
        );
    }

    #[tokio::test]
    async fn test_growth_scope_loads_pipeline_signals() {
        let source = StaticSignalSource::new()
            .with_count(CountSignal::GrowthFollowUpsOverdue, 2)
            .with_count(CountSignal::GrowthNoOutreachSent, 1)
            .with_last_activity(now() - Duration::days(20));
        let scope = Scope::founder_growth("user-1");

        let ctx = build_context(&source, &scope, &EngineConfig::default(), now()).await;
        let growth = ctx.growth.expect("growth context");
        assert_eq!(growth.overdue_follow_up_count, 2);
        assert_eq!(growth.no_outreach_sent_count, 1);
        assert_eq!(growth.days_since_activity, Some(20));
    }

    #[tokio::test]
    async fn test_unrepresentable_window_falls_back() {
        let source = StaticSignalSource::new().with_count(CountSignal::FailedDeliveries, 2);
        let scope = Scope::command_center("cc-1");
        let config = EngineConfig {
            failed_delivery_window_hours: i64::MAX,
            ..EngineConfig::default()
        };

        let ctx = build_context(&source, &scope, &config, now()).await;
        assert_eq!(ctx.failed_delivery_count, 2);
        assert!(ctx.degraded.is_empty());
    }
}
