//! Candidate scoring and deterministic ordering.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::types::{Candidate, RankedCandidate, ScoreBreakdown};

const BOOST_CAP: i32 = 10;
const FRICTION_CAP: i32 = 5;
/// Applied when the same dedupe key is already queued in scope.
pub const DEDUPE_PENALTY: i32 = 5;
pub const MAX_SCORE: i32 = 100;

/// Score one candidate, component by component.
pub fn score_candidate(candidate: &Candidate, already_queued: bool) -> ScoreBreakdown {
    let boost = |v: i32| v.clamp(0, BOOST_CAP);
    let mut b = ScoreBreakdown {
        base: candidate.priority.base_score(),
        count_boost: boost(candidate.count_boost),
        recency_boost: boost(candidate.recency_boost),
        urgency_boost: boost(candidate.urgency_boost),
        impact_boost: boost(candidate.impact_boost),
        friction_penalty: candidate.friction_penalty.clamp(0, FRICTION_CAP),
        dedupe_penalty: if already_queued { DEDUPE_PENALTY } else { 0 },
        total: 0,
    };
    let raw = b.base + b.count_boost + b.recency_boost + b.urgency_boost + b.impact_boost
        - b.friction_penalty
        - b.dedupe_penalty;
    b.total = raw.clamp(0, MAX_SCORE);
    b
}

/// Score and sort candidates.
///
/// Order: score desc, priority severity desc, urgency desc, recency desc,
/// dedupe key asc. Identical input always yields identical output.
pub fn rank(
    candidates: Vec<Candidate>,
    existing_dedupe_keys: &HashSet<String>,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .map(|candidate| {
            let breakdown =
                score_candidate(&candidate, existing_dedupe_keys.contains(&candidate.dedupe_key));
            RankedCandidate {
                score: breakdown.total,
                breakdown,
                candidate,
            }
        })
        .collect();
    ranked.sort_by(compare_ranked);
    ranked
}

fn compare_ranked(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.candidate.priority.severity().cmp(&a.candidate.priority.severity()))
        .then_with(|| b.breakdown.urgency_boost.cmp(&a.breakdown.urgency_boost))
        .then_with(|| b.breakdown.recency_boost.cmp(&a.breakdown.recency_boost))
        .then_with(|| a.candidate.dedupe_key.cmp(&b.candidate.dedupe_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    fn cand(key: &str, priority: Priority) -> Candidate {
        Candidate {
            title: key.to_string(),
            reason: String::new(),
            priority,
            source_type: "test".to_string(),
            source_id: None,
            action_url: None,
            payload: serde_json::json!({}),
            created_by_rule: key.to_string(),
            dedupe_key: format!("nba:{key}:command_center:cc-1"),
            entity_type: "command_center".to_string(),
            entity_id: "cc-1".to_string(),
            count_boost: 0,
            recency_boost: 0,
            urgency_boost: 0,
            impact_boost: 0,
            friction_penalty: 0,
        }
    }

    #[test]
    fn test_score_formula_clamps_components() {
        let mut c = cand("a", Priority::High);
        c.count_boost = 40;
        c.urgency_boost = 4;
        c.friction_penalty = 9;
        let b = score_candidate(&c, true);
        assert_eq!(b.count_boost, 10);
        assert_eq!(b.friction_penalty, 5);
        assert_eq!(b.dedupe_penalty, 5);
        assert_eq!(b.total, 75 + 10 + 4 - 5 - 5);

        let mut top = cand("b", Priority::Critical);
        top.count_boost = 10;
        top.urgency_boost = 10;
        assert_eq!(score_candidate(&top, false).total, MAX_SCORE);
    }

    #[test]
    fn test_documented_scores() {
        let mut critical = cand("score_in_critical_band", Priority::Critical);
        critical.urgency_boost = 5;
        critical.impact_boost = 5;
        let mut failed = cand("failed_notification_deliveries", Priority::High);
        failed.count_boost = 4;
        failed.urgency_boost = 4;
        let mut overdue = cand("overdue_reminders_high_priority", Priority::Medium);
        overdue.count_boost = 2;
        overdue.urgency_boost = 3;

        let ranked = rank(vec![overdue, failed, critical], &HashSet::new());
        let scores: Vec<i32> = ranked.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![100, 83, 60]);
    }

    #[test]
    fn test_priority_dominates_equal_scores() {
        // high 75 + 10 + 5 = 90 ties critical 90
        let mut high = cand("a_high", Priority::High);
        high.impact_boost = 10;
        high.count_boost = 5;
        let critical = cand("z_critical", Priority::Critical);

        let ranked = rank(vec![high, critical], &HashSet::new());
        assert_eq!(ranked[0].score, ranked[1].score);
        assert_eq!(ranked[0].candidate.priority, Priority::Critical);
    }

    #[test]
    fn test_tie_breaks_on_urgency_recency_then_key() {
        let mut urgent = cand("c", Priority::Medium);
        urgent.urgency_boost = 2;
        let mut recent = cand("b", Priority::Medium);
        recent.recency_boost = 2;
        let plain_b = cand("e", Priority::Medium);
        let mut plain_a = cand("d", Priority::Medium);
        plain_a.count_boost = 2;

        let ranked = rank(vec![plain_b, recent, plain_a, urgent], &HashSet::new());
        let keys: Vec<&str> = ranked.iter().map(|r| r.candidate.created_by_rule.as_str()).collect();
        assert_eq!(keys, vec!["c", "b", "d", "e"]);
        assert!(ranked[3].score < ranked[2].score);
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let input: Vec<Candidate> = ["q", "a", "m", "b"]
            .iter()
            .map(|k| cand(k, Priority::Low))
            .collect();
        let existing: HashSet<String> = [input[2].dedupe_key.clone()].into_iter().collect();

        let first = serde_json::to_string(&rank(input.clone(), &existing)).unwrap();
        let mut reversed = input;
        reversed.reverse();
        let second = serde_json::to_string(&rank(reversed, &existing)).unwrap();
        assert_eq!(first, second);
    }
}
