//! Delivery runner: the single entry point that executes an action against
//! a queue row.
//!
//! The runner never returns an error to its caller. Every outcome, including
//! a handler panic, resolves to a [`DeliveryResult`]; every attempt that
//! reaches a handler leaves one row in `next_action_executions`.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::window_start;
use crate::db::attributions::NewAttribution;
use crate::db::executions::NewExecution;
use crate::db::{ActionDb, DbNextAction};
use crate::error::NbaError;
use crate::nba::attribution::{
    capture_snapshot, delta, is_attribution_relevant, to_outcome, AttributionSnapshot,
};
use crate::signals::SignalSource;
use crate::types::{EngineConfig, ExecutionStatus, Scope};

use super::registry::{DeliveryAction, DeliveryContext, DeliveryRegistry};
use super::sanitize::sanitize_meta;
use super::services::DeliveryServices;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub next_action_id: String,
    pub action_key: String,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub params: Value,
}

impl DeliveryRequest {
    pub fn new(next_action_id: impl Into<String>, action_key: impl Into<String>) -> Self {
        Self {
            next_action_id: next_action_id.into(),
            action_key: action_key.into(),
            actor_id: None,
            params: json!({}),
        }
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// True when a recent success was returned instead of running again.
    pub deduplicated: bool,
}

impl DeliveryResult {
    fn success(execution_id: String, deduplicated: bool) -> Self {
        Self {
            ok: true,
            execution_id: Some(execution_id),
            error_code: None,
            error_message: None,
            deduplicated,
        }
    }

    fn failure(err: &NbaError, execution_id: Option<String>) -> Self {
        Self {
            ok: false,
            execution_id,
            error_code: Some(err.error_code().to_string()),
            error_message: Some(err.message()),
            deduplicated: false,
        }
    }
}

pub struct DeliveryRunner<'a> {
    pub db: &'a ActionDb,
    pub source: &'a dyn SignalSource,
    pub services: &'a dyn DeliveryServices,
    pub registry: &'a DeliveryRegistry,
    pub config: &'a EngineConfig,
}

impl<'a> DeliveryRunner<'a> {
    pub async fn run(&self, request: &DeliveryRequest) -> DeliveryResult {
        self.run_at(request, Utc::now()).await
    }

    /// Run `request` as of `now`.
    pub async fn run_at(&self, request: &DeliveryRequest, now: DateTime<Utc>) -> DeliveryResult {
        let Some(handler) = self.registry.lookup(&request.action_key) else {
            let err = NbaError::UnknownAction(request.action_key.clone());
            emit_rejection(request, &err);
            return DeliveryResult::failure(&err, None);
        };

        let action = match self.db.get_next_action(&request.next_action_id) {
            Ok(Some(action)) => action,
            Ok(None) => {
                let err = NbaError::NotFound(request.next_action_id.clone());
                emit_rejection(request, &err);
                return DeliveryResult::failure(&err, None);
            }
            Err(e) => {
                let err = NbaError::from(e);
                emit_rejection(request, &err);
                return DeliveryResult::failure(&err, None);
            }
        };

        let since = match self
            .config
            .idempotency_window()
            .and_then(|window| window_start(now, window))
        {
            Ok(since) => since,
            Err(err) => {
                emit_rejection(request, &err);
                return DeliveryResult::failure(&err, None);
            }
        };
        match self
            .db
            .find_recent_success(&action.id, &request.action_key, since)
        {
            Ok(Some(previous)) => {
                log::info!(
                    "Skipping {} on {}: succeeded at {} as {}",
                    request.action_key,
                    action.id,
                    previous.started_at,
                    previous.id
                );
                return DeliveryResult::success(previous.id, true);
            }
            Ok(None) => {}
            Err(e) => log::warn!("Idempotency lookup failed for {}: {}", action.id, e),
        }

        self.execute(handler, &action, request, now).await
    }

    async fn execute(
        &self,
        handler: &dyn DeliveryAction,
        action: &DbNextAction,
        request: &DeliveryRequest,
        now: DateTime<Utc>,
    ) -> DeliveryResult {
        let scope = Scope::from_entity(&action.entity_type, &action.entity_id);
        let attributed = is_attribution_relevant(&request.action_key);
        let before = match (&scope, attributed) {
            (Some(scope), true) => self.snapshot(scope, now).await,
            _ => None,
        };

        let ctx = DeliveryContext {
            db: self.db,
            source: self.source,
            services: self.services,
            config: self.config,
            action,
            actor_id: request.actor_id.as_deref(),
            params: &request.params,
            now,
        };
        let clock = Instant::now();
        let result = match AssertUnwindSafe(handler.run(&ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(NbaError::Internal(format!(
                "handler {} panicked: {}",
                request.action_key,
                panic_message(panic.as_ref())
            ))),
        };
        let finished_at = now + Duration::from_std(clock.elapsed()).unwrap_or_else(|_| Duration::zero());

        let (status, handler_meta, error) = match result {
            Ok(outcome) => (ExecutionStatus::Success, outcome.meta, None),
            Err(e) => (ExecutionStatus::Failed, json!({}), Some(e)),
        };
        let meta = sanitize_meta(&json!({
            "params": request.params,
            "result": handler_meta,
        }));
        let idempotency_key = handler.idempotency_key(action, now);
        let error_code = error.as_ref().map(|e| e.error_code().to_string());
        let error_message = error.as_ref().map(|e| e.message());

        let execution_id = match self.db.insert_execution(&NewExecution {
            next_action_id: &action.id,
            action_key: &request.action_key,
            idempotency_key: Some(&idempotency_key),
            actor_id: request.actor_id.as_deref(),
            status,
            started_at: now,
            finished_at,
            error_code: error_code.as_deref(),
            error_message: error_message.as_deref(),
            meta: &meta,
        }) {
            Ok(id) => id,
            Err(e) => {
                log::error!("Failed to record execution of {} on {}: {}", request.action_key, action.id, e);
                return DeliveryResult::failure(&NbaError::from(e), None);
            }
        };

        if let Err(e) = self.db.record_next_action_execution(
            &action.id,
            finished_at,
            status,
            error_message.as_deref(),
        ) {
            log::warn!("Failed to stamp execution on {}: {}", action.id, e);
        }

        if let (Some(scope), Some(before), ExecutionStatus::Success) = (&scope, &before, status) {
            self.attribute(scope, before, action, request, &execution_id, finished_at)
                .await;
        }

        emit_event(request, &execution_id, status, error_code.as_deref(), &meta);

        match error {
            None => DeliveryResult::success(execution_id, false),
            Some(e) => DeliveryResult::failure(&e, Some(execution_id)),
        }
    }

    async fn snapshot(&self, scope: &Scope, now: DateTime<Utc>) -> Option<AttributionSnapshot> {
        match capture_snapshot(self.db, self.source, scope, self.config, now).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("Attribution snapshot failed for {}: {}", scope, e);
                None
            }
        }
    }

    /// Best effort. Failures are logged and never reach the caller.
    async fn attribute(
        &self,
        scope: &Scope,
        before: &AttributionSnapshot,
        action: &DbNextAction,
        request: &DeliveryRequest,
        execution_id: &str,
        now: DateTime<Utc>,
    ) {
        let Some(after) = self.snapshot(scope, now).await else {
            return;
        };
        let d = delta(before, &after);
        let outcome = to_outcome(&d);
        let (Ok(before_json), Ok(after_json), Ok(delta_json)) = (
            serde_json::to_value(before),
            serde_json::to_value(&after),
            serde_json::to_value(d),
        ) else {
            log::warn!("Attribution for {} could not be serialized", execution_id);
            return;
        };
        let record = NewAttribution {
            execution_id,
            next_action_id: &action.id,
            actor_id: request.actor_id.as_deref(),
            source_type: &action.source_type,
            rule_key: Some(&action.created_by_rule),
            action_key: &request.action_key,
            entity_type: &action.entity_type,
            entity_id: &action.entity_id,
            before: &before_json,
            after: &after_json,
            delta: &delta_json,
            outcome,
        };
        match self.db.insert_attribution(&record, now) {
            Ok(_) => log::info!("Attributed {} as {}", execution_id, outcome.as_str()),
            Err(e) => log::warn!("Attribution write failed for {}: {}", execution_id, e),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn emit_event(
    request: &DeliveryRequest,
    execution_id: &str,
    status: ExecutionStatus,
    error_code: Option<&str>,
    meta: &Value,
) {
    match status {
        ExecutionStatus::Success => tracing::info!(
            action_key = %request.action_key,
            next_action_id = %request.next_action_id,
            execution_id = %execution_id,
            status = status.as_str(),
            meta = %meta,
            "next action delivered"
        ),
        ExecutionStatus::Failed => tracing::warn!(
            action_key = %request.action_key,
            next_action_id = %request.next_action_id,
            execution_id = %execution_id,
            status = status.as_str(),
            error_code = error_code.unwrap_or("internal_error"),
            meta = %meta,
            "next action delivery failed"
        ),
    }
}

fn emit_rejection(request: &DeliveryRequest, err: &NbaError) {
    tracing::warn!(
        action_key = %request.action_key,
        next_action_id = %request.next_action_id,
        error_code = err.error_code(),
        "next action delivery rejected"
    );
}
