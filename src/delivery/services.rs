//! Collaborators the delivery handlers call out to.
//!
//! Handlers depend on these services, never the reverse. Each call returns
//! a small JSON document that becomes part of the execution meta.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::db::DbNextAction;
use crate::error::NbaError;
use crate::types::Scope;

#[async_trait]
pub trait DeliveryServices: Send + Sync {
    /// Ask the score subsystem to recompute the scope's score.
    async fn recompute_score(&self, scope: &Scope) -> Result<Value, NbaError>;

    /// Re-run the risk-rule engine for the scope.
    async fn run_risk_rules(&self, scope: &Scope) -> Result<Value, NbaError>;

    /// Queue an asynchronous retry of whatever the row points at. Returns a job id.
    async fn enqueue_retry(&self, action: &DbNextAction) -> Result<String, NbaError>;

    async fn reengage_deal(&self, deal_id: &str, actor_id: Option<&str>) -> Result<Value, NbaError>;

    async fn schedule_follow_up(&self, deal_id: &str, due_at: DateTime<Utc>) -> Result<Value, NbaError>;

    async fn send_referral_ask(&self, deal_id: &str) -> Result<Value, NbaError>;

    async fn log_outreach(&self, deal_id: &str, channel: &str) -> Result<Value, NbaError>;
}

/// Accepts every call and does nothing. Used by the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopServices;

#[async_trait]
impl DeliveryServices for NoopServices {
    async fn recompute_score(&self, _scope: &Scope) -> Result<Value, NbaError> {
        Ok(json!({}))
    }

    async fn run_risk_rules(&self, _scope: &Scope) -> Result<Value, NbaError> {
        Ok(json!({}))
    }

    async fn enqueue_retry(&self, action: &DbNextAction) -> Result<String, NbaError> {
        Ok(format!("retry-{}", action.id))
    }

    async fn reengage_deal(&self, _deal_id: &str, _actor_id: Option<&str>) -> Result<Value, NbaError> {
        Ok(json!({}))
    }

    async fn schedule_follow_up(&self, _deal_id: &str, _due_at: DateTime<Utc>) -> Result<Value, NbaError> {
        Ok(json!({}))
    }

    async fn send_referral_ask(&self, _deal_id: &str) -> Result<Value, NbaError> {
        Ok(json!({}))
    }

    async fn log_outreach(&self, _deal_id: &str, _channel: &str) -> Result<Value, NbaError> {
        Ok(json!({}))
    }
}
