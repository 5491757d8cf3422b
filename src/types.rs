//! Shared value types for the next-best-action engine.
//!
//! Closed sets (priorities, statuses, scopes, bands) are enums that round-trip
//! through their snake_case SQL labels; free-form identities (dedupe keys,
//! entity ids) stay strings.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Priority band assigned by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    /// Parse from SQL string. Unknown labels fall back to `low`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "critical" => Priority::Critical,
            "high" => Priority::High,
            "medium" => Priority::Medium,
            _ => Priority::Low,
        }
    }

    /// Base score before boosts and penalties.
    pub fn base_score(&self) -> i32 {
        match self {
            Priority::Critical => 90,
            Priority::High => 75,
            Priority::Medium => 55,
            Priority::Low => 30,
        }
    }

    /// Higher is more severe. Used as a ranking tie-break.
    pub fn severity(&self) -> u8 {
        match self {
            Priority::Critical => 4,
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Queue row status. `done` and `dismissed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Queued,
    Done,
    Dismissed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Queued => "queued",
            ActionStatus::Done => "done",
            ActionStatus::Dismissed => "dismissed",
        }
    }

    /// Strict parse for caller input. Unknown labels are `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(ActionStatus::Queued),
            "done" => Some(ActionStatus::Done),
            "dismissed" => Some(ActionStatus::Dismissed),
            _ => None,
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "done" => ActionStatus::Done,
            "dismissed" => ActionStatus::Dismissed,
            _ => ActionStatus::Queued,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Done | ActionStatus::Dismissed)
    }
}

/// Outcome of one delivery execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "success" => ExecutionStatus::Success,
            _ => ExecutionStatus::Failed,
        }
    }
}

/// Attribution label for an executed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Improved,
    Neutral,
    Worsened,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Improved => "improved",
            Outcome::Neutral => "neutral",
            Outcome::Worsened => "worsened",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "improved" => Outcome::Improved,
            "worsened" => Outcome::Worsened,
            _ => Outcome::Neutral,
        }
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// The kind of surface an evaluation pass is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    CommandCenter,
    ReviewStream,
    FounderGrowth,
}

impl ScopeKind {
    pub const ALL: [ScopeKind; 3] = [
        ScopeKind::CommandCenter,
        ScopeKind::ReviewStream,
        ScopeKind::FounderGrowth,
    ];

    /// String label, also used as the `entity_type` of queue rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::CommandCenter => "command_center",
            ScopeKind::ReviewStream => "review_stream",
            ScopeKind::FounderGrowth => "founder_growth",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "command_center" => Some(ScopeKind::CommandCenter),
            "review_stream" => Some(ScopeKind::ReviewStream),
            "founder_growth" => Some(ScopeKind::FounderGrowth),
            _ => None,
        }
    }
}

/// `(entityType, entityId)` pair an evaluation pass is computed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub kind: ScopeKind,
    pub entity_id: String,
}

impl Scope {
    pub fn new(kind: ScopeKind, entity_id: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
        }
    }

    pub fn command_center(entity_id: impl Into<String>) -> Self {
        Self::new(ScopeKind::CommandCenter, entity_id)
    }

    pub fn review_stream(entity_id: impl Into<String>) -> Self {
        Self::new(ScopeKind::ReviewStream, entity_id)
    }

    /// Growth scope is keyed by the user whose pipeline is evaluated.
    pub fn founder_growth(user_id: impl Into<String>) -> Self {
        Self::new(ScopeKind::FounderGrowth, user_id)
    }

    pub fn entity_type(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Rebuild a scope from a queue row's entity columns.
    pub fn from_entity(entity_type: &str, entity_id: &str) -> Option<Self> {
        ScopeKind::parse(entity_type).map(|kind| Self::new(kind, entity_id))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.entity_id)
    }
}

/// Latest band reported by the score subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Healthy,
    Watch,
    AtRisk,
    Critical,
    #[default]
    Unknown,
}

impl ScoreBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreBand::Healthy => "healthy",
            ScoreBand::Watch => "watch",
            ScoreBand::AtRisk => "at_risk",
            ScoreBand::Critical => "critical",
            ScoreBand::Unknown => "unknown",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "healthy" => ScoreBand::Healthy,
            "watch" => ScoreBand::Watch,
            "at_risk" => ScoreBand::AtRisk,
            "critical" => ScoreBand::Critical,
            _ => ScoreBand::Unknown,
        }
    }

    /// Health rank: higher is healthier. `None` for an unknown band.
    pub fn health_rank(&self) -> Option<i32> {
        match self {
            ScoreBand::Critical => Some(0),
            ScoreBand::AtRisk => Some(1),
            ScoreBand::Watch => Some(2),
            ScoreBand::Healthy => Some(3),
            ScoreBand::Unknown => None,
        }
    }
}

/// What triggered an evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Manual,
    Scheduled,
    Delivery,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Manual => "manual",
            RunMode::Scheduled => "scheduled",
            RunMode::Delivery => "delivery",
        }
    }
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// A recommended action produced by one rule for one scope. Never persisted
/// as-is; only its upsert into `next_actions` is durable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub title: String,
    pub reason: String,
    pub priority: Priority,
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    pub payload: serde_json::Value,
    pub created_by_rule: String,
    pub dedupe_key: String,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default)]
    pub count_boost: i32,
    #[serde(default)]
    pub recency_boost: i32,
    #[serde(default)]
    pub urgency_boost: i32,
    #[serde(default)]
    pub impact_boost: i32,
    #[serde(default)]
    pub friction_penalty: i32,
}

/// Component-wise score, persisted with each row for explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub base: i32,
    pub count_boost: i32,
    pub recency_boost: i32,
    pub urgency_boost: i32,
    pub impact_boost: i32,
    pub friction_penalty: i32,
    pub dedupe_penalty: i32,
    pub total: i32,
}

/// A candidate with its final score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedCandidate {
    pub candidate: Candidate,
    pub score: i32,
    pub breakdown: ScoreBreakdown,
}

/// Natural identity of a candidate: `nba:<ruleKey>:<entityType>:<entityId>`.
pub fn dedupe_key(rule_key: &str, entity_type: &str, entity_id: &str) -> String {
    format!("nba:{rule_key}:{entity_type}:{entity_id}")
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine configuration, read from `~/.nextaction/config.json`.
///
/// Every field has a default so a missing or partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Explicit database path. Defaults to `~/.nextaction/nextaction.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// Window in which a successful execution short-circuits a repeat request.
    #[serde(default = "default_idempotency_window_secs")]
    pub idempotency_window_secs: i64,
    #[serde(default = "default_snooze_hours")]
    pub snooze_hours: i64,
    #[serde(default = "default_suppression_days")]
    pub suppression_days: i64,
    /// Trailing window for the failed-notification count.
    #[serde(default = "default_failed_delivery_window_hours")]
    pub failed_delivery_window_hours: i64,
    /// Growth pipeline is "inactive" after this many days without activity.
    #[serde(default = "default_growth_inactivity_days")]
    pub growth_inactivity_days: i64,
    /// Retention-overdue count at which the rule escalates to `high`.
    #[serde(default = "default_retention_high_threshold")]
    pub retention_high_threshold: i64,
}

fn default_idempotency_window_secs() -> i64 {
    60
}

fn default_snooze_hours() -> i64 {
    24
}

fn default_suppression_days() -> i64 {
    30
}

fn default_failed_delivery_window_hours() -> i64 {
    24
}

fn default_growth_inactivity_days() -> i64 {
    14
}

fn default_retention_high_threshold() -> i64 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            idempotency_window_secs: default_idempotency_window_secs(),
            snooze_hours: default_snooze_hours(),
            suppression_days: default_suppression_days(),
            failed_delivery_window_hours: default_failed_delivery_window_hours(),
            growth_inactivity_days: default_growth_inactivity_days(),
            retention_high_threshold: default_retention_high_threshold(),
        }
    }
}
