//! Rule evaluation.
//!
//! Each rule is a pure function over the aggregated context that emits at
//! most one candidate. Priority is fixed per rule; counts only feed
//! `count_boost`, which is capped so volume alone can never lift an item
//! into a higher band. The evaluator does not sort: ranking owns ordering.

use serde_json::json;

use crate::signals::CountSignal;
use crate::types::{dedupe_key, Candidate, EngineConfig, Priority, Scope, ScopeKind, ScoreBand};

use super::context::NextActionContext;

/// Upper bound for any boost a rule assigns.
pub const MAX_BOOST: i32 = 10;

/// Tunables a few rules read. Built from [`EngineConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleSettings {
    pub retention_high_threshold: i64,
    pub growth_inactivity_days: i64,
}

impl Default for RuleSettings {
    fn default() -> Self {
        RuleSettings::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RuleSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            retention_high_threshold: config.retention_high_threshold,
            growth_inactivity_days: config.growth_inactivity_days,
        }
    }
}

/// Signature of a rule.
pub type RuleFn = fn(&NextActionContext, &Scope, &RuleSettings) -> Option<Candidate>;

/// A compiled rule and the scopes it is valid for.
pub struct RuleEntry {
    pub key: &'static str,
    pub scopes: &'static [ScopeKind],
    pub rule: RuleFn,
}

const CC: ScopeKind = ScopeKind::CommandCenter;
const RS: ScopeKind = ScopeKind::ReviewStream;
const FG: ScopeKind = ScopeKind::FounderGrowth;

/// The full rule set with its declared scopes, in evaluation order.
pub const RULES: &[RuleEntry] = &[
    RuleEntry {
        key: "score_in_critical_band",
        scopes: &[CC, RS],
        rule: rule_score_in_critical_band,
    },
    RuleEntry {
        key: "score_in_at_risk_band",
        scopes: &[CC, RS],
        rule: rule_score_in_at_risk_band,
    },
    RuleEntry {
        key: "failed_notification_deliveries",
        scopes: &[CC],
        rule: rule_failed_notification_deliveries,
    },
    RuleEntry {
        key: "overdue_reminders_high_priority",
        scopes: &[CC, RS],
        rule: rule_overdue_reminders_high_priority,
    },
    RuleEntry {
        key: "proposals_missing_follow_up",
        scopes: &[CC, FG],
        rule: rule_proposals_missing_follow_up,
    },
    RuleEntry {
        key: "retention_overdue",
        scopes: &[CC],
        rule: rule_retention_overdue,
    },
    RuleEntry {
        key: "handoff_awaiting_confirmation",
        scopes: &[CC],
        rule: rule_handoff_awaiting_confirmation,
    },
    RuleEntry {
        key: "won_deals_without_delivery",
        scopes: &[CC, FG],
        rule: rule_won_deals_without_delivery,
    },
    RuleEntry {
        key: "referral_ask_gaps",
        scopes: &[CC, FG],
        rule: rule_referral_ask_gaps,
    },
    RuleEntry {
        key: "stalled_contacts",
        scopes: &[CC, FG],
        rule: rule_stalled_contacts,
    },
    RuleEntry {
        key: "growth_follow_ups_overdue",
        scopes: &[FG],
        rule: rule_growth_follow_ups_overdue,
    },
    RuleEntry {
        key: "growth_no_outreach_sent",
        scopes: &[FG],
        rule: rule_growth_no_outreach_sent,
    },
    RuleEntry {
        key: "growth_pipeline_inactive",
        scopes: &[FG],
        rule: rule_growth_pipeline_inactive,
    },
];

/// Scopes a rule is declared for. Empty for unknown keys.
pub fn rule_scopes(rule_key: &str) -> &'static [ScopeKind] {
    RULES
        .iter()
        .find(|entry| entry.key == rule_key)
        .map(|entry| entry.scopes)
        .unwrap_or(&[])
}

/// Evaluate every rule valid for `scope` with default settings.
pub fn evaluate(ctx: &NextActionContext, scope: &Scope) -> Vec<Candidate> {
    evaluate_with(ctx, scope, &RuleSettings::default())
}

/// Evaluate every rule valid for `scope`. Pure and deterministic.
pub fn evaluate_with(
    ctx: &NextActionContext,
    scope: &Scope,
    settings: &RuleSettings,
) -> Vec<Candidate> {
    RULES
        .iter()
        .filter(|entry| entry.scopes.contains(&scope.kind))
        .filter_map(|entry| (entry.rule)(ctx, scope, settings))
        .collect()
}

/// Volume boost: two points per item, capped at [`MAX_BOOST`].
pub fn count_boost(count: i64) -> i32 {
    count.saturating_mul(2).clamp(0, MAX_BOOST as i64) as i32
}

fn plural(count: i64, one: &str, many: &str) -> String {
    if count == 1 {
        format!("1 {one}")
    } else {
        format!("{count} {many}")
    }
}

/// Candidate skeleton with zero boosts.
#[allow(clippy::too_many_arguments)]
fn candidate(
    rule_key: &str,
    scope: &Scope,
    priority: Priority,
    title: String,
    reason: String,
    source_type: &str,
    action_url: &str,
    payload: serde_json::Value,
) -> Candidate {
    Candidate {
        title,
        reason,
        priority,
        source_type: source_type.to_string(),
        source_id: Some(scope.entity_id.clone()),
        action_url: Some(action_url.to_string()),
        payload,
        created_by_rule: rule_key.to_string(),
        dedupe_key: dedupe_key(rule_key, scope.entity_type(), &scope.entity_id),
        entity_type: scope.entity_type().to_string(),
        entity_id: scope.entity_id.clone(),
        count_boost: 0,
        recency_boost: 0,
        urgency_boost: 0,
        impact_boost: 0,
        friction_penalty: 0,
    }
}

// ---------------------------------------------------------------------------
// Score band
// ---------------------------------------------------------------------------

pub fn rule_score_in_critical_band(
    ctx: &NextActionContext,
    scope: &Scope,
    _settings: &RuleSettings,
) -> Option<Candidate> {
    if ctx.command_center_band != ScoreBand::Critical {
        return None;
    }
    let mut c = candidate(
        "score_in_critical_band",
        scope,
        Priority::Critical,
        "Score is in the critical band".to_string(),
        "The latest score snapshot fell into the critical band. Review the drivers and stabilize before anything else."
            .to_string(),
        "score_snapshot",
        "/command-center/score",
        json!({ "band": ctx.command_center_band.as_str() }),
    );
    c.urgency_boost = 5;
    c.impact_boost = 5;
    Some(c)
}

pub fn rule_score_in_at_risk_band(
    ctx: &NextActionContext,
    scope: &Scope,
    _settings: &RuleSettings,
) -> Option<Candidate> {
    if ctx.command_center_band != ScoreBand::AtRisk {
        return None;
    }
    let mut c = candidate(
        "score_in_at_risk_band",
        scope,
        Priority::High,
        "Score is at risk".to_string(),
        "The latest score snapshot is in the at-risk band and trending toward critical.".to_string(),
        "score_snapshot",
        "/command-center/score",
        json!({ "band": ctx.command_center_band.as_str() }),
    );
    c.urgency_boost = 3;
    c.impact_boost = 3;
    Some(c)
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

pub fn rule_failed_notification_deliveries(
    ctx: &NextActionContext,
    scope: &Scope,
    _settings: &RuleSettings,
) -> Option<Candidate> {
    let count = ctx.failed_delivery_count;
    if count <= 0 {
        return None;
    }
    let mut c = candidate(
        "failed_notification_deliveries",
        scope,
        Priority::High,
        format!("Retry {}", plural(count, "failed notification", "failed notifications")),
        format!(
            "{} could not be delivered in the last window. Recipients may be missing alerts.",
            plural(count, "notification", "notifications")
        ),
        "notification",
        "/notifications?status=failed",
        json!({ "count": count }),
    );
    c.count_boost = count_boost(count);
    c.urgency_boost = 4;
    Some(c)
}

pub fn rule_overdue_reminders_high_priority(
    ctx: &NextActionContext,
    scope: &Scope,
    _settings: &RuleSettings,
) -> Option<Candidate> {
    let count = ctx.overdue_reminders_count;
    if count <= 0 {
        return None;
    }
    let mut c = candidate(
        "overdue_reminders_high_priority",
        scope,
        Priority::Medium,
        format!("Clear {}", plural(count, "overdue reminder", "overdue reminders")),
        format!(
            "{} marked high or critical {} past due.",
            plural(count, "reminder", "reminders"),
            if count == 1 { "is" } else { "are" }
        ),
        "reminder",
        "/reminders?filter=overdue",
        json!({ "count": count }),
    );
    c.count_boost = count_boost(count);
    c.urgency_boost = 3;
    Some(c)
}

pub fn rule_proposals_missing_follow_up(
    ctx: &NextActionContext,
    scope: &Scope,
    _settings: &RuleSettings,
) -> Option<Candidate> {
    let count = ctx.proposals_missing_follow_up_count;
    if count <= 0 {
        return None;
    }
    let mut c = candidate(
        "proposals_missing_follow_up",
        scope,
        Priority::Medium,
        format!("Schedule follow-ups for {}", plural(count, "sent proposal", "sent proposals")),
        format!(
            "{} went out without a follow-up date.",
            plural(count, "proposal", "proposals")
        ),
        "proposal",
        "/proposals?filter=missing_follow_up",
        json!({ "count": count }),
    );
    c.count_boost = count_boost(count);
    c.impact_boost = 4;
    Some(c)
}

pub fn rule_retention_overdue(
    ctx: &NextActionContext,
    scope: &Scope,
    settings: &RuleSettings,
) -> Option<Candidate> {
    let count = ctx.retention_overdue_count;
    if count <= 0 {
        return None;
    }
    let priority = if count >= settings.retention_high_threshold {
        Priority::High
    } else {
        Priority::Medium
    };
    let mut c = candidate(
        "retention_overdue",
        scope,
        priority,
        format!("Run {}", plural(count, "overdue retention check-in", "overdue retention check-ins")),
        format!(
            "{} passed the retention check-in date.",
            plural(count, "delivery project", "delivery projects")
        ),
        "delivery_project",
        "/delivery?filter=retention_overdue",
        json!({ "count": count, "threshold": settings.retention_high_threshold }),
    );
    c.count_boost = count_boost(count);
    c.impact_boost = 3;
    Some(c)
}

pub fn rule_handoff_awaiting_confirmation(
    ctx: &NextActionContext,
    scope: &Scope,
    _settings: &RuleSettings,
) -> Option<Candidate> {
    let count = ctx.handoff_awaiting_confirmation_count;
    if count <= 0 {
        return None;
    }
    let mut c = candidate(
        "handoff_awaiting_confirmation",
        scope,
        Priority::Medium,
        format!("Confirm {}", plural(count, "pending handoff", "pending handoffs")),
        format!(
            "{} waiting on client confirmation.",
            plural(count, "handoff is", "handoffs are")
        ),
        "delivery_project",
        "/delivery?filter=handoff_pending",
        json!({ "count": count }),
    );
    c.count_boost = count_boost(count);
    // Needs the client to respond.
    c.friction_penalty = 2;
    Some(c)
}

// ---------------------------------------------------------------------------
// Growth
// ---------------------------------------------------------------------------

pub fn rule_won_deals_without_delivery(
    ctx: &NextActionContext,
    scope: &Scope,
    _settings: &RuleSettings,
) -> Option<Candidate> {
    let count = ctx.won_deals_without_delivery_count;
    if count <= 0 {
        return None;
    }
    let mut c = candidate(
        "won_deals_without_delivery",
        scope,
        Priority::High,
        format!("Kick off delivery for {}", plural(count, "won deal", "won deals")),
        format!(
            "{} closed without a delivery project.",
            plural(count, "deal", "deals")
        ),
        "lead",
        "/growth/deals?filter=won_no_delivery",
        json!({ "count": count }),
    );
    c.count_boost = count_boost(count);
    c.impact_boost = 5;
    Some(c)
}

pub fn rule_referral_ask_gaps(
    ctx: &NextActionContext,
    scope: &Scope,
    _settings: &RuleSettings,
) -> Option<Candidate> {
    let count = ctx.referral_ask_gap_count;
    if count <= 0 {
        return None;
    }
    let mut c = candidate(
        "referral_ask_gaps",
        scope,
        Priority::Low,
        format!("Ask {} for referrals", plural(count, "happy client", "happy clients")),
        format!(
            "{} finished delivery without a referral ask.",
            plural(count, "client", "clients")
        ),
        "growth",
        "/growth/referrals",
        json!({ "count": count }),
    );
    c.count_boost = count_boost(count);
    c.impact_boost = 3;
    Some(c)
}

pub fn rule_stalled_contacts(
    ctx: &NextActionContext,
    scope: &Scope,
    _settings: &RuleSettings,
) -> Option<Candidate> {
    let count = ctx.stalled_contact_count;
    if count <= 0 {
        return None;
    }
    let mut c = candidate(
        "stalled_contacts",
        scope,
        Priority::Low,
        format!("Re-engage {}", plural(count, "stalled contact", "stalled contacts")),
        format!(
            "{} had no touchpoint in the stall window.",
            plural(count, "contact", "contacts")
        ),
        "lead",
        "/growth/contacts?filter=stalled",
        json!({ "count": count }),
    );
    c.count_boost = count_boost(count);
    Some(c)
}

pub fn rule_growth_follow_ups_overdue(
    ctx: &NextActionContext,
    scope: &Scope,
    _settings: &RuleSettings,
) -> Option<Candidate> {
    let count = ctx.count(CountSignal::GrowthFollowUpsOverdue);
    if count <= 0 {
        return None;
    }
    let mut c = candidate(
        "growth_follow_ups_overdue",
        scope,
        Priority::High,
        format!("Send {}", plural(count, "overdue follow-up", "overdue follow-ups")),
        format!(
            "{} in your pipeline slipped past the scheduled date.",
            plural(count, "follow-up", "follow-ups")
        ),
        "growth",
        "/growth/follow-ups?filter=overdue",
        json!({ "count": count }),
    );
    c.count_boost = count_boost(count);
    c.urgency_boost = 5;
    Some(c)
}

pub fn rule_growth_no_outreach_sent(
    ctx: &NextActionContext,
    scope: &Scope,
    _settings: &RuleSettings,
) -> Option<Candidate> {
    let count = ctx.count(CountSignal::GrowthNoOutreachSent);
    if count <= 0 {
        return None;
    }
    let mut c = candidate(
        "growth_no_outreach_sent",
        scope,
        Priority::Medium,
        format!("Start outreach on {}", plural(count, "deal", "deals")),
        format!(
            "{} in your pipeline never had outreach sent.",
            plural(count, "deal", "deals")
        ),
        "growth",
        "/growth/deals?filter=no_outreach",
        json!({ "count": count }),
    );
    c.count_boost = count_boost(count);
    c.impact_boost = 2;
    Some(c)
}

pub fn rule_growth_pipeline_inactive(
    ctx: &NextActionContext,
    scope: &Scope,
    settings: &RuleSettings,
) -> Option<Candidate> {
    let days = ctx.growth.as_ref()?.days_since_activity?;
    if days < settings.growth_inactivity_days {
        return None;
    }
    let mut c = candidate(
        "growth_pipeline_inactive",
        scope,
        Priority::Medium,
        "Restart pipeline activity".to_string(),
        format!("No growth activity logged in {days} days."),
        "growth",
        "/growth",
        json!({ "daysSinceActivity": days, "threshold": settings.growth_inactivity_days }),
    );
    // Staler pipelines rank higher, one point per day past the threshold.
    c.recency_boost = (days - settings.growth_inactivity_days + 1).clamp(0, MAX_BOOST as i64) as i32;
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nba::context::GrowthContext;

    fn cc_ctx() -> NextActionContext {
        NextActionContext::empty(Scope::command_center("cc-1"))
    }

    fn keys(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.created_by_rule.as_str()).collect()
    }

    #[test]
    fn test_empty_context_emits_nothing() {
        for kind in ScopeKind::ALL {
            let scope = Scope::new(kind, "e-1");
            let ctx = NextActionContext::empty(scope.clone());
            assert!(evaluate(&ctx, &scope).is_empty(), "{:?} should be quiet", kind);
        }
    }

    #[test]
    fn test_documented_command_center_example() {
        let scope = Scope::command_center("cc-1");
        let ctx = NextActionContext {
            command_center_band: ScoreBand::Critical,
            failed_delivery_count: 2,
            overdue_reminders_count: 1,
            ..cc_ctx()
        };

        let candidates = evaluate(&ctx, &scope);
        assert_eq!(
            keys(&candidates),
            vec![
                "score_in_critical_band",
                "failed_notification_deliveries",
                "overdue_reminders_high_priority"
            ]
        );
        assert_eq!(candidates[0].priority, Priority::Critical);
        assert_eq!(candidates[1].priority, Priority::High);
        assert_eq!(candidates[2].priority, Priority::Medium);
        assert_eq!(
            candidates[1].dedupe_key,
            "nba:failed_notification_deliveries:command_center:cc-1"
        );
    }

    #[test]
    fn test_retention_priority_crosses_threshold() {
        let scope = Scope::command_center("cc-1");
        let low = NextActionContext { retention_overdue_count: 2, ..cc_ctx() };
        let high = NextActionContext { retention_overdue_count: 5, ..cc_ctx() };

        assert_eq!(evaluate(&low, &scope)[0].priority, Priority::Medium);
        assert_eq!(evaluate(&high, &scope)[0].priority, Priority::High);
    }

    #[test]
    fn test_count_boost_is_capped() {
        assert_eq!(count_boost(0), 0);
        assert_eq!(count_boost(2), 4);
        assert_eq!(count_boost(500), MAX_BOOST);

        let scope = Scope::command_center("cc-1");
        let ctx = NextActionContext { overdue_reminders_count: 10_000, ..cc_ctx() };
        let c = &evaluate(&ctx, &scope)[0];
        assert_eq!(c.priority, Priority::Medium, "volume never changes the band");
        assert_eq!(c.count_boost, MAX_BOOST);
    }

    #[test]
    fn test_rules_outside_scope_emit_nothing() {
        let scope = Scope::review_stream("rs-1");
        let ctx = NextActionContext {
            failed_delivery_count: 4,
            overdue_reminders_count: 2,
            ..NextActionContext::empty(scope.clone())
        };
        assert_eq!(keys(&evaluate(&ctx, &scope)), vec!["overdue_reminders_high_priority"]);
        assert_eq!(rule_scopes("failed_notification_deliveries"), &[ScopeKind::CommandCenter]);
        assert!(rule_scopes("nope").is_empty());
    }

    #[test]
    fn test_growth_rules() {
        let scope = Scope::founder_growth("user-1");
        let ctx = NextActionContext {
            growth: Some(GrowthContext {
                overdue_follow_up_count: 1,
                no_outreach_sent_count: 3,
                last_activity_at: None,
                days_since_activity: Some(16),
            }),
            ..NextActionContext::empty(scope.clone())
        };

        let candidates = evaluate(&ctx, &scope);
        assert_eq!(
            keys(&candidates),
            vec![
                "growth_follow_ups_overdue",
                "growth_no_outreach_sent",
                "growth_pipeline_inactive"
            ]
        );
        assert_eq!(candidates[2].recency_boost, 3);
        assert_eq!(candidates[0].entity_type, "founder_growth");
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let scope = Scope::command_center("cc-1");
        let ctx = NextActionContext {
            command_center_band: ScoreBand::AtRisk,
            won_deals_without_delivery_count: 2,
            stalled_contact_count: 7,
            ..cc_ctx()
        };
        assert_eq!(evaluate(&ctx, &scope), evaluate(&ctx, &scope));
    }
}
