//! Read interface onto the operational signals the engine aggregates.
//!
//! Each external collaborator (score, notification, reminder, proposal,
//! delivery-project and growth subsystems) is reached through one
//! [`SignalSource`]. The engine only needs counts, a band and a timestamp;
//! where those numbers come from is the collaborator's business.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Scope, ScoreBand};

pub mod snapshots;
pub mod source;

pub use snapshots::SnapshotSignalSource;
pub use source::StaticSignalSource;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Signal {signal} unavailable: {message}")]
    Unavailable { signal: String, message: String },

    #[error("Malformed signal {signal}: {message}")]
    Malformed { signal: String, message: String },
}

impl SignalError {
    pub fn unavailable(signal: &str, message: impl Into<String>) -> Self {
        SignalError::Unavailable {
            signal: signal.to_string(),
            message: message.into(),
        }
    }
}

/// A countable signal published by one collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CountSignal {
    /// Notification deliveries that failed inside the trailing window.
    FailedDeliveries,
    /// High/critical reminders past due.
    OverdueReminders,
    /// Sent proposals with no follow-up date.
    ProposalsMissingFollowUp,
    /// Delivery projects past their retention check-in.
    RetentionOverdue,
    /// Delivery handoffs waiting on client confirmation.
    HandoffAwaitingConfirmation,
    /// Won deals with no delivery project.
    WonDealsWithoutDelivery,
    /// Completed deliveries never asked for a referral.
    ReferralAskGaps,
    /// Contacts with no touch in the stall window.
    StalledContacts,
    /// Growth follow-up schedules past due (user scope only).
    GrowthFollowUpsOverdue,
    /// Growth deals with no outreach sent (user scope only).
    GrowthNoOutreachSent,
}

impl CountSignal {
    pub const ALL: [CountSignal; 10] = [
        CountSignal::FailedDeliveries,
        CountSignal::OverdueReminders,
        CountSignal::ProposalsMissingFollowUp,
        CountSignal::RetentionOverdue,
        CountSignal::HandoffAwaitingConfirmation,
        CountSignal::WonDealsWithoutDelivery,
        CountSignal::ReferralAskGaps,
        CountSignal::StalledContacts,
        CountSignal::GrowthFollowUpsOverdue,
        CountSignal::GrowthNoOutreachSent,
    ];

    /// Stable key, also the `signal_key` column of `signal_snapshots`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CountSignal::FailedDeliveries => "failed_delivery_count",
            CountSignal::OverdueReminders => "overdue_reminders_count",
            CountSignal::ProposalsMissingFollowUp => "proposals_missing_follow_up_count",
            CountSignal::RetentionOverdue => "retention_overdue_count",
            CountSignal::HandoffAwaitingConfirmation => "handoff_awaiting_confirmation_count",
            CountSignal::WonDealsWithoutDelivery => "won_deals_without_delivery_count",
            CountSignal::ReferralAskGaps => "referral_ask_gap_count",
            CountSignal::StalledContacts => "stalled_contact_count",
            CountSignal::GrowthFollowUpsOverdue => "growth_follow_ups_overdue_count",
            CountSignal::GrowthNoOutreachSent => "growth_no_outreach_sent_count",
        }
    }

    /// Only fetched when a user-scoped growth context is requested.
    pub fn is_growth(&self) -> bool {
        matches!(
            self,
            CountSignal::GrowthFollowUpsOverdue | CountSignal::GrowthNoOutreachSent
        )
    }

    /// Counted over a trailing window rather than as a point-in-time total.
    pub fn is_windowed(&self) -> bool {
        matches!(self, CountSignal::FailedDeliveries)
    }
}

/// Signal key for the score band.
pub const SCORE_BAND_KEY: &str = "score_band";
/// Signal key for the growth pipeline's last activity timestamp.
pub const LAST_ACTIVITY_KEY: &str = "growth_last_activity_at";

/// Read-only access to the external collaborators.
///
/// Every fetch may fail independently; the aggregator degrades a failed
/// fetch to zero / unknown instead of aborting the pass.
#[async_trait::async_trait]
pub trait SignalSource: Send + Sync {
    /// Latest band/score for the scoped entity.
    async fn score_band(&self, scope: &Scope) -> Result<ScoreBand, SignalError>;

    /// Current value of a count signal. `since` bounds windowed signals.
    async fn count(
        &self,
        scope: &Scope,
        signal: CountSignal,
        since: DateTime<Utc>,
    ) -> Result<i64, SignalError>;

    /// Last recorded activity in a user's growth pipeline.
    async fn last_activity_at(&self, scope: &Scope) -> Result<Option<DateTime<Utc>>, SignalError>;
}
