//! Evidence view of one queue row: why it ranks where it does and what
//! happened when it was acted on.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{ActionDb, DbAttribution, DbExecution, DbNextAction};
use crate::error::NbaError;
use crate::types::ScoreBreakdown;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionExplanation {
    pub action: DbNextAction,
    pub active: bool,
    pub breakdown: Option<ScoreBreakdown>,
    /// One line per non-zero score component.
    pub score_lines: Vec<String>,
    pub executions: Vec<DbExecution>,
    pub attributions: Vec<DbAttribution>,
}

pub fn explain_action(
    db: &ActionDb,
    id: &str,
    now: DateTime<Utc>,
) -> Result<ActionExplanation, NbaError> {
    let action = db
        .get_next_action(id)?
        .ok_or_else(|| NbaError::NotFound(id.to_string()))?;
    let executions = db.list_executions(id)?;
    let attributions = db.list_attributions(id)?;
    let breakdown = action.score_breakdown;
    Ok(ActionExplanation {
        active: action.is_active(now),
        score_lines: breakdown.as_ref().map(describe_breakdown).unwrap_or_default(),
        breakdown,
        action,
        executions,
        attributions,
    })
}

pub fn describe_breakdown(b: &ScoreBreakdown) -> Vec<String> {
    let mut lines = vec![format!("base {}", b.base)];
    for (label, value) in [
        ("count", b.count_boost),
        ("recency", b.recency_boost),
        ("urgency", b.urgency_boost),
        ("impact", b.impact_boost),
    ] {
        if value != 0 {
            lines.push(format!("+{value} {label}"));
        }
    }
    if b.friction_penalty != 0 {
        lines.push(format!("-{} friction", b.friction_penalty));
    }
    if b.dedupe_penalty != 0 {
        lines.push(format!("-{} already queued", b.dedupe_penalty));
    }
    lines.push(format!("= {}", b.total));
    lines
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;

    use super::*;
    use crate::db::test_utils::test_db;
    use crate::nba::context::NextActionContext;
    use crate::nba::queue::upsert_candidates;
    use crate::nba::ranking::rank;
    use crate::nba::rules::evaluate;
    use crate::types::Scope;

    #[test]
    fn test_describe_breakdown() {
        let b = ScoreBreakdown {
            base: 55,
            count_boost: 2,
            urgency_boost: 3,
            friction_penalty: 2,
            dedupe_penalty: 5,
            total: 53,
            ..Default::default()
        };
        assert_eq!(
            describe_breakdown(&b),
            vec!["base 55", "+2 count", "+3 urgency", "-2 friction", "-5 already queued", "= 53"]
        );
    }

    #[test]
    fn test_explain_action() {
        let db = test_db();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let scope = Scope::command_center("cc-1");
        let ctx = NextActionContext {
            overdue_reminders_count: 1,
            ..NextActionContext::empty(scope.clone())
        };
        upsert_candidates(&db, &rank(evaluate(&ctx, &scope), &HashSet::new()), now);
        let row = db
            .get_next_action_by_dedupe_key("nba:overdue_reminders_high_priority:command_center:cc-1")
            .unwrap()
            .unwrap();

        let explained = explain_action(&db, &row.id, now).unwrap();
        assert!(explained.active);
        assert_eq!(explained.breakdown.map(|b| b.total), Some(60));
        assert_eq!(explained.score_lines.last().map(String::as_str), Some("= 60"));
        assert!(explained.executions.is_empty());

        assert!(matches!(explain_action(&db, "nba-nope", now), Err(NbaError::NotFound(_))));
    }
}
