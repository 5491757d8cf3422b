//! Scrub secrets and personal data from execution meta before it is stored
//! or emitted.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

pub const REDACTED: &str = "[redacted]";

fn re_sensitive_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(token|secret|password|passwd|api[_-]?key|authorization|cookie|session|credential|e[_-]?mail|phone)",
        )
        .unwrap()
    })
}

fn re_email() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

/// Returns true if a meta key names a secret or PII field.
pub fn is_sensitive_key(key: &str) -> bool {
    re_sensitive_key().is_match(key)
}

/// Recursively redact sensitive keys and mask e-mail addresses in strings.
pub fn sanitize_meta(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_sensitive_key(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        sanitize_meta(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_meta).collect()),
        Value::String(s) => Value::String(mask_emails(s)),
        other => other.clone(),
    }
}

/// Replace every e-mail address in free text.
pub fn mask_emails(text: &str) -> String {
    re_email().replace_all(text, REDACTED).into_owned()
}
