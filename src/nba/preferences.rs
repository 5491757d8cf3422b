//! Suppression preferences.
//!
//! A preference hides a rule (or one exact dedupe key) for a scope until it
//! expires or is revoked. Filtering is read-only: candidates that pass are
//! returned untouched.

use chrono::{DateTime, Utc};

use crate::config::{suppression_window, window_end};
use crate::db::preferences::SuppressionTarget;
use crate::db::{ActionDb, DbError, DbPreference};
use crate::error::NbaError;
use crate::types::{Candidate, Scope};

/// Drop every candidate matched by an active preference.
pub fn filter_candidates(
    candidates: Vec<Candidate>,
    preferences: &[DbPreference],
    now: DateTime<Utc>,
) -> Vec<Candidate> {
    let active: Vec<&DbPreference> = preferences.iter().filter(|p| p.is_active(now)).collect();
    if active.is_empty() {
        return candidates;
    }
    candidates
        .into_iter()
        .filter(|candidate| {
            let suppressed = active.iter().any(|p| p.matches(candidate));
            if suppressed {
                log::debug!("Suppressed candidate {}", candidate.dedupe_key);
            }
            !suppressed
        })
        .collect()
}

/// Load the scope's active suppressions and filter `candidates` through them.
pub fn filter_suppressed(
    db: &ActionDb,
    candidates: Vec<Candidate>,
    scope: &Scope,
    now: DateTime<Utc>,
) -> Result<Vec<Candidate>, DbError> {
    let preferences = db.active_preferences(scope.entity_type(), &scope.entity_id, now)?;
    Ok(filter_candidates(candidates, &preferences, now))
}

/// Suppress everything `rule_key` emits in `scope` for `days` days.
///
/// `days` must be positive and within [`crate::config::MAX_WINDOW_DAYS`].
pub fn suppress_rule(
    db: &ActionDb,
    scope: &Scope,
    rule_key: &str,
    days: i64,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<String, NbaError> {
    let until = window_end(now, suppression_window(days)?)?;
    let id = db.insert_preference(
        scope.entity_type(),
        &scope.entity_id,
        SuppressionTarget::Rule(rule_key),
        Some(until),
        reason,
        now,
    )?;
    log::info!("Suppressed rule {} for {} until {}", rule_key, scope, until);
    Ok(id)
}

/// Suppress one exact dedupe key. `days = None` never expires.
pub fn suppress_dedupe_key(
    db: &ActionDb,
    scope: &Scope,
    dedupe_key: &str,
    days: Option<i64>,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<String, NbaError> {
    let until = match days {
        Some(days) => Some(window_end(now, suppression_window(days)?)?),
        None => None,
    };
    let id = db.insert_preference(
        scope.entity_type(),
        &scope.entity_id,
        SuppressionTarget::DedupeKey(dedupe_key),
        until,
        reason,
        now,
    )?;
    Ok(id)
}

pub fn revoke_preference(db: &ActionDb, id: &str, now: DateTime<Utc>) -> Result<bool, DbError> {
    db.revoke_preference(id, now)
}

pub fn active_preferences(
    db: &ActionDb,
    scope: &Scope,
    now: DateTime<Utc>,
) -> Result<Vec<DbPreference>, DbError> {
    db.active_preferences(scope.entity_type(), &scope.entity_id, now)
}
