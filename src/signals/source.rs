//! In-memory signal source.
//!
//! Backs tests and dry runs. Values can be changed between passes and any
//! signal can be made to fail, which is how degraded-collaborator behaviour
//! is exercised.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::types::{Scope, ScoreBand};

use super::{CountSignal, SignalError, SignalSource, LAST_ACTIVITY_KEY, SCORE_BAND_KEY};

#[derive(Debug, Default)]
struct StaticSignals {
    band: ScoreBand,
    counts: HashMap<CountSignal, i64>,
    last_activity_at: Option<DateTime<Utc>>,
    failing: HashSet<String>,
}

/// Fixed signal values shared by every scope.
#[derive(Debug, Default)]
pub struct StaticSignalSource {
    inner: RwLock<StaticSignals>,
}

impl StaticSignalSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_band(self, band: ScoreBand) -> Self {
        self.set_band(band);
        self
    }

    pub fn with_count(self, signal: CountSignal, value: i64) -> Self {
        self.set_count(signal, value);
        self
    }

    pub fn with_last_activity(self, at: DateTime<Utc>) -> Self {
        self.inner.write().last_activity_at = Some(at);
        self
    }

    /// Make every fetch of `signal_key` fail.
    pub fn failing(self, signal_key: &str) -> Self {
        self.inner.write().failing.insert(signal_key.to_string());
        self
    }

    pub fn set_band(&self, band: ScoreBand) {
        self.inner.write().band = band;
    }

    pub fn set_count(&self, signal: CountSignal, value: i64) {
        self.inner.write().counts.insert(signal, value);
    }

    fn check(&self, key: &str) -> Result<(), SignalError> {
        if self.inner.read().failing.contains(key) {
            return Err(SignalError::unavailable(key, "collaborator offline"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SignalSource for StaticSignalSource {
    async fn score_band(&self, _scope: &Scope) -> Result<ScoreBand, SignalError> {
        self.check(SCORE_BAND_KEY)?;
        Ok(self.inner.read().band)
    }

    async fn count(
        &self,
        _scope: &Scope,
        signal: CountSignal,
        _since: DateTime<Utc>,
    ) -> Result<i64, SignalError> {
        self.check(signal.as_str())?;
        Ok(self.inner.read().counts.get(&signal).copied().unwrap_or(0))
    }

    async fn last_activity_at(&self, _scope: &Scope) -> Result<Option<DateTime<Utc>>, SignalError> {
        self.check(LAST_ACTIVITY_KEY)?;
        Ok(self.inner.read().last_activity_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_values_and_failures() {
        let scope = Scope::command_center("cc-1");
        let source = StaticSignalSource::new()
            .with_band(ScoreBand::Watch)
            .with_count(CountSignal::OverdueReminders, 4)
            .failing("failed_delivery_count");

        assert_eq!(source.score_band(&scope).await.unwrap(), ScoreBand::Watch);
        assert_eq!(
            source.count(&scope, CountSignal::OverdueReminders, Utc::now()).await.unwrap(),
            4
        );
        assert_eq!(
            source.count(&scope, CountSignal::StalledContacts, Utc::now()).await.unwrap(),
            0
        );
        assert!(source
            .count(&scope, CountSignal::FailedDeliveries, Utc::now())
            .await
            .is_err());

        source.set_count(CountSignal::OverdueReminders, 0);
        assert_eq!(
            source.count(&scope, CountSignal::OverdueReminders, Utc::now()).await.unwrap(),
            0
        );
    }
}
