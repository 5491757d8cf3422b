//! Error types for the next-best-action engine.
//!
//! Errors are classified by the stable codes callers see in execution records
//! and delivery results:
//! - Caller errors: `unknown_action`, `not_found`, `missing_params`
//! - Handler errors: `internal_error` or a handler-declared code
//! - Infrastructure: database, signal and configuration failures

use thiserror::Error;

use crate::db::DbError;
use crate::signals::SignalError;

/// Error types for engine and delivery operations.
#[derive(Debug, Error)]
pub enum NbaError {
    #[error("Unknown delivery action: {0}")]
    UnknownAction(String),

    #[error("Next action not found: {0}")]
    NotFound(String),

    #[error("Missing required parameter: {0}")]
    MissingParams(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// A handler-declared failure surfaced verbatim (e.g. a downstream API error).
    #[error("{code}: {message}")]
    Handler { code: String, message: String },

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl NbaError {
    /// Build a handler-declared error with its own code.
    pub fn handler(code: impl Into<String>, message: impl Into<String>) -> Self {
        NbaError::Handler {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Stable snake_case code recorded on failed executions.
    pub fn error_code(&self) -> &str {
        match self {
            NbaError::UnknownAction(_) => "unknown_action",
            NbaError::NotFound(_) => "not_found",
            NbaError::MissingParams(_) => "missing_params",
            NbaError::Handler { code, .. } => code.as_str(),
            NbaError::Internal(_) | NbaError::Db(_) | NbaError::Signal(_) | NbaError::Config(_) => {
                "internal_error"
            }
        }
    }

    /// Returns true if the caller passed something the engine can never run.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            NbaError::UnknownAction(_) | NbaError::NotFound(_) | NbaError::MissingParams(_)
        )
    }

    /// Message without the code prefix, as stored in `error_message`.
    pub fn message(&self) -> String {
        match self {
            NbaError::Handler { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for NbaError {
    fn from(err: rusqlite::Error) -> Self {
        NbaError::Db(DbError::Sqlite(err))
    }
}

impl From<serde_json::Error> for NbaError {
    fn from(err: serde_json::Error) -> Self {
        NbaError::Internal(format!("JSON error: {err}"))
    }
}

/// Serializable error representation returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryError {
    pub ok: bool,
    pub error_code: String,
    pub error_message: String,
}

impl From<&NbaError> for DeliveryError {
    fn from(err: &NbaError) -> Self {
        DeliveryError {
            ok: false,
            error_code: err.error_code().to_string(),
            error_message: err.message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_follow_taxonomy() {
        assert_eq!(NbaError::UnknownAction("x".into()).error_code(), "unknown_action");
        assert_eq!(NbaError::NotFound("x".into()).error_code(), "not_found");
        assert_eq!(NbaError::MissingParams("dealId".into()).error_code(), "missing_params");
        assert_eq!(NbaError::Internal("boom".into()).error_code(), "internal_error");
        assert_eq!(
            NbaError::Config("bad".into()).error_code(),
            "internal_error",
            "infrastructure failures collapse to internal_error"
        );
    }

    #[test]
    fn test_handler_code_is_surfaced_verbatim() {
        let err = NbaError::handler("crm_unavailable", "CRM returned 503");
        assert_eq!(err.error_code(), "crm_unavailable");
        assert_eq!(err.message(), "CRM returned 503");

        let rendered = DeliveryError::from(&err);
        assert!(!rendered.ok);
        assert_eq!(rendered.error_code, "crm_unavailable");
    }

    #[test]
    fn test_caller_errors() {
        assert!(NbaError::NotFound("nba-1".into()).is_caller_error());
        assert!(!NbaError::Internal("x".into()).is_caller_error());
    }
}
