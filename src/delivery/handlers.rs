//! Built-in delivery actions.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use crate::config::window_end;
use crate::db::DbNextAction;
use crate::error::NbaError;
use crate::nba::{evaluate_and_upsert, preferences, queue};
use crate::types::{RunMode, Scope};

use super::registry::{
    daily_key, once_key, ActionKey, DeliveryAction, DeliveryContext, DeliveryOutcome,
};

/// Scope of the row a handler runs against.
fn action_scope(action: &DbNextAction) -> Result<Scope, NbaError> {
    Scope::from_entity(&action.entity_type, &action.entity_id).ok_or_else(|| {
        NbaError::Internal(format!(
            "next action {} has unknown entity type {}",
            action.id, action.entity_type
        ))
    })
}

fn str_field<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Deal targeted by a growth action: request params first, then the row's
/// payload, then the row's source when it points at a lead.
fn deal_id(ctx: &DeliveryContext<'_>) -> Result<String, NbaError> {
    str_field(ctx.params, "dealId")
        .or_else(|| str_field(&ctx.action.payload, "dealId"))
        .or_else(|| {
            (ctx.action.source_type == "lead")
                .then_some(ctx.action.source_id.as_deref())
                .flatten()
        })
        .map(str::to_string)
        .ok_or_else(|| NbaError::MissingParams("dealId".to_string()))
}

fn transition_meta(t: &queue::Transition) -> Value {
    json!({ "status": t.status.as_str(), "changed": t.changed })
}

// ---------------------------------------------------------------------------
// Queue lifecycle
// ---------------------------------------------------------------------------

pub struct MarkDone;

#[async_trait(?Send)]
impl DeliveryAction for MarkDone {
    fn key(&self) -> ActionKey {
        ActionKey::MarkDone
    }

    fn label(&self) -> &'static str {
        "Mark done"
    }

    fn idempotency_key(&self, action: &DbNextAction, _now: DateTime<Utc>) -> String {
        once_key(self.key(), action)
    }

    async fn run(&self, ctx: &DeliveryContext<'_>) -> Result<DeliveryOutcome, NbaError> {
        let t = queue::complete(ctx.db, &ctx.action.id, ctx.now)?;
        Ok(DeliveryOutcome::new(transition_meta(&t)))
    }
}

pub struct SnoozeOneDay;

#[async_trait(?Send)]
impl DeliveryAction for SnoozeOneDay {
    fn key(&self) -> ActionKey {
        ActionKey::Snooze1d
    }

    fn label(&self) -> &'static str {
        "Snooze 1 day"
    }

    fn idempotency_key(&self, action: &DbNextAction, now: DateTime<Utc>) -> String {
        daily_key(self.key(), action, now)
    }

    async fn run(&self, ctx: &DeliveryContext<'_>) -> Result<DeliveryOutcome, NbaError> {
        let until = window_end(ctx.now, ctx.config.snooze_window()?)?;
        let t = queue::snooze(ctx.db, &ctx.action.id, until, ctx.now)?;
        let mut meta = transition_meta(&t);
        meta["snoozedUntil"] = json!(until.to_rfc3339());
        Ok(DeliveryOutcome::new(meta))
    }
}

pub struct Dismiss;

#[async_trait(?Send)]
impl DeliveryAction for Dismiss {
    fn key(&self) -> ActionKey {
        ActionKey::Dismiss
    }

    fn label(&self) -> &'static str {
        "Dismiss"
    }

    fn idempotency_key(&self, action: &DbNextAction, _now: DateTime<Utc>) -> String {
        once_key(self.key(), action)
    }

    async fn run(&self, ctx: &DeliveryContext<'_>) -> Result<DeliveryOutcome, NbaError> {
        let t = queue::dismiss(ctx.db, &ctx.action.id, ctx.now)?;
        Ok(DeliveryOutcome::new(transition_meta(&t)))
    }
}

/// Dismiss the row and mute its rule for the scope.
pub struct SuppressThirtyDays;

#[async_trait(?Send)]
impl DeliveryAction for SuppressThirtyDays {
    fn key(&self) -> ActionKey {
        ActionKey::Suppress30d
    }

    fn label(&self) -> &'static str {
        "Hide for 30 days"
    }

    fn confirm_text(&self) -> Option<&'static str> {
        Some("This hides every recommendation from this rule here for 30 days.")
    }

    fn idempotency_key(&self, action: &DbNextAction, _now: DateTime<Utc>) -> String {
        once_key(self.key(), action)
    }

    async fn run(&self, ctx: &DeliveryContext<'_>) -> Result<DeliveryOutcome, NbaError> {
        let scope = action_scope(ctx.action)?;
        let rule = ctx.action.created_by_rule.clone();
        let days = ctx.config.suppression_days;
        let (preference_id, t) = ctx.db.with_transaction(|db| {
            let preference_id = preferences::suppress_rule(
                db,
                &scope,
                &rule,
                days,
                "suppressed from next action",
                ctx.now,
            )?;
            let t = queue::dismiss(db, &ctx.action.id, ctx.now)?;
            Ok::<_, NbaError>((preference_id, t))
        })?;
        let mut meta = transition_meta(&t);
        meta["preferenceId"] = json!(preference_id);
        meta["ruleKey"] = json!(rule);
        meta["days"] = json!(days);
        Ok(DeliveryOutcome::new(meta))
    }
}

// ---------------------------------------------------------------------------
// Recompute
// ---------------------------------------------------------------------------

pub struct RecomputeScore;

#[async_trait(?Send)]
impl DeliveryAction for RecomputeScore {
    fn key(&self) -> ActionKey {
        ActionKey::RecomputeScore
    }

    fn label(&self) -> &'static str {
        "Recompute score"
    }

    fn idempotency_key(&self, action: &DbNextAction, now: DateTime<Utc>) -> String {
        daily_key(self.key(), action, now)
    }

    async fn run(&self, ctx: &DeliveryContext<'_>) -> Result<DeliveryOutcome, NbaError> {
        let scope = action_scope(ctx.action)?;
        let meta = ctx.services.recompute_score(&scope).await?;
        Ok(DeliveryOutcome::new(meta))
    }
}

pub struct RunRiskRules;

#[async_trait(?Send)]
impl DeliveryAction for RunRiskRules {
    fn key(&self) -> ActionKey {
        ActionKey::RunRiskRules
    }

    fn label(&self) -> &'static str {
        "Re-run risk rules"
    }

    fn idempotency_key(&self, action: &DbNextAction, now: DateTime<Utc>) -> String {
        daily_key(self.key(), action, now)
    }

    async fn run(&self, ctx: &DeliveryContext<'_>) -> Result<DeliveryOutcome, NbaError> {
        let scope = action_scope(ctx.action)?;
        let meta = ctx.services.run_risk_rules(&scope).await?;
        Ok(DeliveryOutcome::new(meta))
    }
}

/// Re-run this engine for the row's scope.
pub struct RunNextActions;

#[async_trait(?Send)]
impl DeliveryAction for RunNextActions {
    fn key(&self) -> ActionKey {
        ActionKey::RunNextActions
    }

    fn label(&self) -> &'static str {
        "Refresh next actions"
    }

    fn idempotency_key(&self, action: &DbNextAction, now: DateTime<Utc>) -> String {
        daily_key(self.key(), action, now)
    }

    async fn run(&self, ctx: &DeliveryContext<'_>) -> Result<DeliveryOutcome, NbaError> {
        let scope = action_scope(ctx.action)?;
        let report = evaluate_and_upsert(
            ctx.db,
            ctx.source,
            &scope,
            RunMode::Delivery,
            ctx.config,
            ctx.now,
        )
        .await?;
        Ok(DeliveryOutcome::new(serde_json::to_value(&report)?))
    }
}

pub struct EnqueueRetry;

#[async_trait(?Send)]
impl DeliveryAction for EnqueueRetry {
    fn key(&self) -> ActionKey {
        ActionKey::EnqueueRetry
    }

    fn label(&self) -> &'static str {
        "Retry"
    }

    fn idempotency_key(&self, action: &DbNextAction, now: DateTime<Utc>) -> String {
        daily_key(self.key(), action, now)
    }

    async fn run(&self, ctx: &DeliveryContext<'_>) -> Result<DeliveryOutcome, NbaError> {
        let job_id = ctx.services.enqueue_retry(ctx.action).await?;
        Ok(DeliveryOutcome::new(json!({ "jobId": job_id })))
    }
}

// ---------------------------------------------------------------------------
// Growth
// ---------------------------------------------------------------------------

pub struct ReengageDeal;

#[async_trait(?Send)]
impl DeliveryAction for ReengageDeal {
    fn key(&self) -> ActionKey {
        ActionKey::ReengageDeal
    }

    fn label(&self) -> &'static str {
        "Re-engage deal"
    }

    fn idempotency_key(&self, action: &DbNextAction, now: DateTime<Utc>) -> String {
        daily_key(self.key(), action, now)
    }

    async fn run(&self, ctx: &DeliveryContext<'_>) -> Result<DeliveryOutcome, NbaError> {
        let deal = deal_id(ctx)?;
        let meta = ctx.services.reengage_deal(&deal, ctx.actor_id).await?;
        Ok(DeliveryOutcome::new(meta))
    }
}

/// Default lead time when the caller gives no `dueAt`.
const FOLLOW_UP_DAYS: i64 = 3;

pub struct ScheduleFollowUp;

#[async_trait(?Send)]
impl DeliveryAction for ScheduleFollowUp {
    fn key(&self) -> ActionKey {
        ActionKey::ScheduleFollowUp
    }

    fn label(&self) -> &'static str {
        "Schedule follow-up"
    }

    fn idempotency_key(&self, action: &DbNextAction, now: DateTime<Utc>) -> String {
        daily_key(self.key(), action, now)
    }

    async fn run(&self, ctx: &DeliveryContext<'_>) -> Result<DeliveryOutcome, NbaError> {
        let deal = deal_id(ctx)?;
        let due_at = match str_field(ctx.params, "dueAt") {
            Some(raw) => crate::db::parse_ts(raw)
                .ok_or_else(|| NbaError::MissingParams(format!("dueAt is not RFC 3339: {raw}")))?,
            None => ctx.now + Duration::days(FOLLOW_UP_DAYS),
        };
        let meta = ctx.services.schedule_follow_up(&deal, due_at).await?;
        Ok(DeliveryOutcome::new(meta))
    }
}

pub struct SendReferralAsk;

#[async_trait(?Send)]
impl DeliveryAction for SendReferralAsk {
    fn key(&self) -> ActionKey {
        ActionKey::SendReferralAsk
    }

    fn label(&self) -> &'static str {
        "Send referral ask"
    }

    fn confirm_text(&self) -> Option<&'static str> {
        Some("This sends a referral request to the client.")
    }

    fn idempotency_key(&self, action: &DbNextAction, _now: DateTime<Utc>) -> String {
        once_key(self.key(), action)
    }

    async fn run(&self, ctx: &DeliveryContext<'_>) -> Result<DeliveryOutcome, NbaError> {
        let deal = deal_id(ctx)?;
        let meta = ctx.services.send_referral_ask(&deal).await?;
        Ok(DeliveryOutcome::new(meta))
    }
}

pub struct LogOutreach;

#[async_trait(?Send)]
impl DeliveryAction for LogOutreach {
    fn key(&self) -> ActionKey {
        ActionKey::LogOutreach
    }

    fn label(&self) -> &'static str {
        "Log outreach"
    }

    fn idempotency_key(&self, action: &DbNextAction, now: DateTime<Utc>) -> String {
        daily_key(self.key(), action, now)
    }

    async fn run(&self, ctx: &DeliveryContext<'_>) -> Result<DeliveryOutcome, NbaError> {
        let deal = deal_id(ctx)?;
        let channel = str_field(ctx.params, "channel").unwrap_or("email");
        let meta = ctx.services.log_outreach(&deal, channel).await?;
        Ok(DeliveryOutcome::new(meta))
    }
}
