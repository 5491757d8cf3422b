//! Delivery action registry.
//!
//! Every action a user can run against a queue row is one concrete type
//! implementing [`DeliveryAction`], registered under its [`ActionKey`].
//! Dispatch is a key lookup; the closed key enum keeps the set exhaustive.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::{ActionDb, DbNextAction};
use crate::error::NbaError;
use crate::signals::SignalSource;
use crate::types::EngineConfig;

use super::handlers;
use super::services::DeliveryServices;

/// Every registered delivery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionKey {
    #[serde(rename = "mark_done")]
    MarkDone,
    #[serde(rename = "snooze_1d")]
    Snooze1d,
    #[serde(rename = "dismiss")]
    Dismiss,
    #[serde(rename = "suppress_30d")]
    Suppress30d,
    #[serde(rename = "recompute_score")]
    RecomputeScore,
    #[serde(rename = "run_risk_rules")]
    RunRiskRules,
    #[serde(rename = "run_next_actions")]
    RunNextActions,
    #[serde(rename = "enqueue_retry")]
    EnqueueRetry,
    #[serde(rename = "reengage_deal")]
    ReengageDeal,
    #[serde(rename = "schedule_follow_up")]
    ScheduleFollowUp,
    #[serde(rename = "send_referral_ask")]
    SendReferralAsk,
    #[serde(rename = "log_outreach")]
    LogOutreach,
}

impl ActionKey {
    pub const ALL: [ActionKey; 12] = [
        ActionKey::MarkDone,
        ActionKey::Snooze1d,
        ActionKey::Dismiss,
        ActionKey::Suppress30d,
        ActionKey::RecomputeScore,
        ActionKey::RunRiskRules,
        ActionKey::RunNextActions,
        ActionKey::EnqueueRetry,
        ActionKey::ReengageDeal,
        ActionKey::ScheduleFollowUp,
        ActionKey::SendReferralAsk,
        ActionKey::LogOutreach,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKey::MarkDone => "mark_done",
            ActionKey::Snooze1d => "snooze_1d",
            ActionKey::Dismiss => "dismiss",
            ActionKey::Suppress30d => "suppress_30d",
            ActionKey::RecomputeScore => "recompute_score",
            ActionKey::RunRiskRules => "run_risk_rules",
            ActionKey::RunNextActions => "run_next_actions",
            ActionKey::EnqueueRetry => "enqueue_retry",
            ActionKey::ReengageDeal => "reengage_deal",
            ActionKey::ScheduleFollowUp => "schedule_follow_up",
            ActionKey::SendReferralAsk => "send_referral_ask",
            ActionKey::LogOutreach => "log_outreach",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        ActionKey::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a handler may touch while it runs.
pub struct DeliveryContext<'a> {
    pub db: &'a ActionDb,
    pub source: &'a dyn SignalSource,
    pub services: &'a dyn DeliveryServices,
    pub config: &'a EngineConfig,
    pub action: &'a DbNextAction,
    pub actor_id: Option<&'a str>,
    /// Caller-supplied parameters, `{}` when none.
    pub params: &'a serde_json::Value,
    pub now: DateTime<Utc>,
}

/// Successful handler result. `meta` is sanitized before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub meta: serde_json::Value,
}

impl DeliveryOutcome {
    pub fn new(meta: serde_json::Value) -> Self {
        Self { meta }
    }
}

/// One runnable action.
///
/// `?Send` because handlers borrow the single-connection [`ActionDb`].
#[async_trait(?Send)]
pub trait DeliveryAction {
    fn key(&self) -> ActionKey;

    fn label(&self) -> &'static str;

    /// Confirmation prompt for destructive actions.
    fn confirm_text(&self) -> Option<&'static str> {
        None
    }

    /// Key identifying "the same request" for this action and row.
    fn idempotency_key(&self, action: &DbNextAction, now: DateTime<Utc>) -> String;

    async fn run(&self, ctx: &DeliveryContext<'_>) -> Result<DeliveryOutcome, NbaError>;
}

/// SHA-256 over `|`-joined parts, hex encoded.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Idempotent for the lifetime of the row.
pub fn once_key(key: ActionKey, action: &DbNextAction) -> String {
    fingerprint(&[key.as_str(), &action.id])
}

/// Idempotent within one UTC day.
pub fn daily_key(key: ActionKey, action: &DbNextAction, now: DateTime<Utc>) -> String {
    let day = now.format("%Y-%m-%d").to_string();
    fingerprint(&[key.as_str(), &action.id, &day])
}

/// Display metadata for one registered action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    pub key: ActionKey,
    pub label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirm_text: Option<&'static str>,
}

pub struct DeliveryRegistry {
    actions: BTreeMap<ActionKey, Box<dyn DeliveryAction>>,
}

impl DeliveryRegistry {
    pub fn new() -> Self {
        Self {
            actions: BTreeMap::new(),
        }
    }

    /// Register an action. A later registration under the same key replaces
    /// the earlier one.
    pub fn register(&mut self, action: Box<dyn DeliveryAction>) {
        self.actions.insert(action.key(), action);
    }

    pub fn get(&self, key: ActionKey) -> Option<&dyn DeliveryAction> {
        self.actions.get(&key).map(|a| a.as_ref())
    }

    /// Look up by wire key.
    pub fn lookup(&self, key: &str) -> Option<&dyn DeliveryAction> {
        ActionKey::parse(key).and_then(|k| self.get(k))
    }

    pub fn describe(&self) -> Vec<ActionDescriptor> {
        self.actions
            .values()
            .map(|a| ActionDescriptor {
                key: a.key(),
                label: a.label(),
                confirm_text: a.confirm_text(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Default for DeliveryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with every built-in action.
pub fn default_registry() -> DeliveryRegistry {
    let mut registry = DeliveryRegistry::new();
    registry.register(Box::new(handlers::MarkDone));
    registry.register(Box::new(handlers::SnoozeOneDay));
    registry.register(Box::new(handlers::Dismiss));
    registry.register(Box::new(handlers::SuppressThirtyDays));
    registry.register(Box::new(handlers::RecomputeScore));
    registry.register(Box::new(handlers::RunRiskRules));
    registry.register(Box::new(handlers::RunNextActions));
    registry.register(Box::new(handlers::EnqueueRetry));
    registry.register(Box::new(handlers::ReengageDeal));
    registry.register(Box::new(handlers::ScheduleFollowUp));
    registry.register(Box::new(handlers::SendReferralAsk));
    registry.register(Box::new(handlers::LogOutreach));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_covers_every_key() {
        let registry = default_registry();
        assert_eq!(registry.len(), ActionKey::ALL.len());
        for key in ActionKey::ALL {
            let action = registry.get(key).expect("registered");
            assert_eq!(action.key(), key);
            assert_eq!(registry.lookup(key.as_str()).map(|a| a.key()), Some(key));
        }
        assert!(registry.lookup("launch_rockets").is_none());
    }

    #[test]
    fn test_action_key_wire_format() {
        assert_eq!(ActionKey::parse("snooze_1d"), Some(ActionKey::Snooze1d));
        assert_eq!(serde_json::to_string(&ActionKey::Suppress30d).unwrap(), "\"suppress_30d\"");
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint(&["mark_done", "nba-1"]);
        assert_eq!(a, fingerprint(&["mark_done", "nba-1"]));
        assert_ne!(a, fingerprint(&["mark_done", "nba-2"]));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_destructive_actions_ask_for_confirmation() {
        let descriptors = default_registry().describe();
        let suppress = descriptors
            .iter()
            .find(|d| d.key == ActionKey::Suppress30d)
            .unwrap();
        assert!(suppress.confirm_text.is_some());
    }
}
