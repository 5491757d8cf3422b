//! Engine configuration loading.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

use crate::error::NbaError;
use crate::types::EngineConfig;

/// Longest window any setting may describe. Keeps every derived timestamp
/// inside the four-digit years the stored RFC 3339 strings sort by.
pub const MAX_WINDOW_DAYS: i64 = 3650;

/// Highest accepted retention escalation threshold.
const MAX_RETENTION_THRESHOLD: i64 = 10_000;

/// Get the canonical config file path (~/.nextaction/config.json)
pub fn config_path() -> Result<PathBuf, NbaError> {
    let home = dirs::home_dir().ok_or_else(|| NbaError::Config("Could not find home directory".into()))?;
    Ok(home.join(".nextaction").join("config.json"))
}

/// Load configuration from ~/.nextaction/config.json. A missing file yields defaults.
pub fn load_config() -> Result<EngineConfig, NbaError> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<EngineConfig, NbaError> {
    if !path.exists() {
        log::debug!("No config at {}, using defaults", path.display());
        return Ok(EngineConfig::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| NbaError::Config(format!("Failed to read config: {}", e)))?;
    let config: EngineConfig = serde_json::from_str(&content)
        .map_err(|e| NbaError::Config(format!("Failed to parse config: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

/// Reject windows and thresholds that would disable the engine's guards or
/// overflow date arithmetic.
pub fn validate(config: &EngineConfig) -> Result<(), NbaError> {
    config.idempotency_window()?;
    config.snooze_window()?;
    config.failed_delivery_window()?;
    suppression_window(config.suppression_days)
        .map_err(|_| out_of_range("suppressionDays", config.suppression_days))?;
    window("growthInactivityDays", config.growth_inactivity_days, Duration::try_days)?;
    if !(1..=MAX_RETENTION_THRESHOLD).contains(&config.retention_high_threshold) {
        return Err(out_of_range("retentionHighThreshold", config.retention_high_threshold));
    }
    Ok(())
}

impl EngineConfig {
    pub fn idempotency_window(&self) -> Result<Duration, NbaError> {
        window("idempotencyWindowSecs", self.idempotency_window_secs, Duration::try_seconds)
    }

    pub fn snooze_window(&self) -> Result<Duration, NbaError> {
        window("snoozeHours", self.snooze_hours, Duration::try_hours)
    }

    pub fn failed_delivery_window(&self) -> Result<Duration, NbaError> {
        window("failedDeliveryWindowHours", self.failed_delivery_window_hours, Duration::try_hours)
    }
}

/// Length of a suppression lasting `days` days.
pub fn suppression_window(days: i64) -> Result<Duration, NbaError> {
    window("days", days, Duration::try_days)
}

/// `now - window`, or a config error if the result is not representable.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> Result<DateTime<Utc>, NbaError> {
    now.checked_sub_signed(window)
        .ok_or_else(|| NbaError::Config(format!("window of {} reaches before the calendar", window)))
}

/// `now + window`, or a config error if the result is not representable.
pub fn window_end(now: DateTime<Utc>, window: Duration) -> Result<DateTime<Utc>, NbaError> {
    now.checked_add_signed(window)
        .ok_or_else(|| NbaError::Config(format!("window of {} reaches past the calendar", window)))
}

fn window(
    name: &str,
    value: i64,
    unit: fn(i64) -> Option<Duration>,
) -> Result<Duration, NbaError> {
    unit(value)
        .filter(|d| *d > Duration::zero() && *d <= Duration::days(MAX_WINDOW_DAYS))
        .ok_or_else(|| out_of_range(name, value))
}

fn out_of_range(name: &str, value: i64) -> NbaError {
    NbaError::Config(format!(
        "{} must be positive and at most {} days, got {}",
        name, MAX_WINDOW_DAYS, value
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_file_is_merged_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "retentionHighThreshold": 5, "dbPath": "/tmp/nba.db" }"#).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.retention_high_threshold, 5);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/nba.db")));
        assert_eq!(config.snooze_hours, 24);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        fs::write(&path, r#"{ "idempotencyWindowSecs": 0 }"#).unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("idempotencyWindowSecs"));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(load_config_from(&path), Err(NbaError::Config(_))));
    }

    #[test]
    fn test_oversized_windows_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        for body in [
            r#"{ "idempotencyWindowSecs": 100000000000000000 }"#,
            r#"{ "snoozeHours": 9223372036854775807 }"#,
            r#"{ "failedDeliveryWindowHours": 100000 }"#,
            r#"{ "suppressionDays": 3000000 }"#,
            r#"{ "growthInactivityDays": 3651 }"#,
            r#"{ "retentionHighThreshold": 10001 }"#,
        ] {
            fs::write(&path, body).unwrap();
            assert!(
                matches!(load_config_from(&path), Err(NbaError::Config(_))),
                "{body} should be rejected"
            );
        }
    }

    #[test]
    fn test_window_accessors_never_panic() {
        let config = EngineConfig {
            idempotency_window_secs: i64::MAX,
            snooze_hours: i64::MIN,
            ..EngineConfig::default()
        };
        assert!(config.idempotency_window().is_err());
        assert!(config.snooze_window().is_err());
        assert_eq!(
            EngineConfig::default().idempotency_window().unwrap(),
            Duration::seconds(60)
        );

        assert!(suppression_window(0).is_err());
        assert!(suppression_window(-5).is_err());
        assert!(suppression_window(MAX_WINDOW_DAYS + 1).is_err());
        assert_eq!(suppression_window(30).unwrap(), Duration::days(30));

        let now = Utc::now();
        assert!(window_start(DateTime::<Utc>::MIN_UTC, Duration::days(1)).is_err());
        assert!(window_end(DateTime::<Utc>::MAX_UTC, Duration::days(1)).is_err());
        assert_eq!(window_end(now, Duration::days(1)).unwrap(), now + Duration::days(1));
    }
}
