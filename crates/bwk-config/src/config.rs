use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use bwk_types::{BulwarkError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Application configuration.
///
/// Durations are kept as seconds so the whole struct serializes cleanly; use the
/// accessor methods to get [`Duration`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Circuit breaker defaults
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
    pub success_threshold: u32,

    // Retry defaults
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub max_delay_secs: f64,

    /// Per-dependency breaker settings, keyed by dependency name.
    pub breakers: HashMap<String, BreakerOverride>,

    pub logging: LoggingConfig,
}

/// Partial breaker settings for a single dependency. Unset fields use the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerOverride {
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    #[serde(default)]
    pub recovery_timeout: Option<f64>,
    #[serde(default)]
    pub success_threshold: Option<u32>,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60.0,
            success_threshold: 3,
            max_retries: 3,
            backoff_factor: 2.0,
            max_delay_secs: 30.0,
            breakers: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables (with dotenvy).
    pub fn load() -> Result<Self> {
        // A missing .env file is fine
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Empty values count as unset. Unparseable numbers fall back to the default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let breakers = match get("BULWARK_BREAKERS") {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                BulwarkError::Config(format!("Invalid BULWARK_BREAKERS JSON: {e}"))
            })?,
            None => HashMap::new(),
        };

        let config = Config {
            failure_threshold: parse_or(get("BULWARK_FAILURE_THRESHOLD"), defaults.failure_threshold),
            recovery_timeout_secs: parse_or(
                get("BULWARK_RECOVERY_TIMEOUT"),
                defaults.recovery_timeout_secs,
            ),
            success_threshold: parse_or(get("BULWARK_SUCCESS_THRESHOLD"), defaults.success_threshold),

            max_retries: parse_or(get("BULWARK_MAX_RETRIES"), defaults.max_retries),
            backoff_factor: parse_or(get("BULWARK_BACKOFF_FACTOR"), defaults.backoff_factor),
            max_delay_secs: parse_or(get("BULWARK_MAX_DELAY"), defaults.max_delay_secs),

            breakers,

            logging: LoggingConfig {
                level: get("LOG_LEVEL").unwrap_or(defaults.logging.level),
                file: get("LOG_FILE").map(PathBuf::from),
                json: get("LOG_JSON")
                    .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
                    .unwrap_or(defaults.logging.json),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a breaker or retry loop meaningless.
    pub fn validate(&self) -> Result<()> {
        check_threshold("failure_threshold", self.failure_threshold)?;
        check_threshold("success_threshold", self.success_threshold)?;
        check_seconds("recovery_timeout", self.recovery_timeout_secs)?;
        check_seconds("max_delay", self.max_delay_secs)?;
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(BulwarkError::Config(format!(
                "backoff_factor must be a non-negative number, got {}",
                self.backoff_factor
            )));
        }

        for (name, o) in &self.breakers {
            if let Some(v) = o.failure_threshold {
                check_threshold(&format!("{name}.failure_threshold"), v)?;
            }
            if let Some(v) = o.success_threshold {
                check_threshold(&format!("{name}.success_threshold"), v)?;
            }
            if let Some(v) = o.recovery_timeout {
                check_seconds(&format!("{name}.recovery_timeout"), v)?;
            }
        }
        Ok(())
    }

    pub fn recovery_timeout(&self) -> Duration {
        seconds(self.recovery_timeout_secs)
    }

    pub fn max_delay(&self) -> Duration {
        seconds(self.max_delay_secs)
    }

    /// Effective `(failure_threshold, recovery_timeout, success_threshold)` for a dependency.
    pub fn breaker_settings(&self, name: &str) -> (u32, Duration, u32) {
        let o = self.breakers.get(name).cloned().unwrap_or_default();
        (
            o.failure_threshold.unwrap_or(self.failure_threshold),
            o.recovery_timeout
                .map(seconds)
                .unwrap_or_else(|| self.recovery_timeout()),
            o.success_threshold.unwrap_or(self.success_threshold),
        )
    }
}

// ---------------------------------------------------------------------------
// Parse helpers
// ---------------------------------------------------------------------------

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Values `validate` would reject become zero.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

fn check_threshold(field: &str, value: u32) -> Result<()> {
    if value == 0 {
        return Err(BulwarkError::Config(format!("{field} must be at least 1")));
    }
    Ok(())
}

fn check_seconds(field: &str, value: f64) -> Result<()> {
    Duration::try_from_secs_f64(value).map(|_| ()).map_err(|_| {
        BulwarkError::Config(format!(
            "{field} must be a non-negative number of seconds that fits a Duration, got {value}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn config_load_defaults() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.failure_threshold, 5);
        assert_eq!(cfg.recovery_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.success_threshold, 3);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.max_delay(), Duration::from_secs(30));
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn config_env_override() {
        let cfg = Config::from_lookup(lookup(&[
            ("BULWARK_FAILURE_THRESHOLD", "7"),
            ("BULWARK_RECOVERY_TIMEOUT", "2.5"),
            ("BULWARK_MAX_RETRIES", "0"),
            ("LOG_JSON", "yes"),
            ("LOG_FILE", "/var/log/bulwark.log"),
        ]))
        .unwrap();
        assert_eq!(cfg.failure_threshold, 7);
        assert_eq!(cfg.recovery_timeout(), Duration::from_millis(2500));
        assert_eq!(cfg.max_retries, 0);
        assert!(cfg.logging.json);
        assert_eq!(cfg.logging.file, Some(PathBuf::from("/var/log/bulwark.log")));
    }

    #[test]
    fn config_unparseable_number_uses_default() {
        let cfg = Config::from_lookup(lookup(&[("BULWARK_MAX_RETRIES", "lots")])).unwrap();
        assert_eq!(cfg.max_retries, 3);
    }

    #[test]
    fn config_rejects_zero_threshold() {
        let err = Config::from_lookup(lookup(&[("BULWARK_SUCCESS_THRESHOLD", "0")])).unwrap_err();
        assert!(matches!(err, BulwarkError::Config(msg) if msg.contains("success_threshold")));
    }

    #[test]
    fn config_rejects_negative_delay() {
        let err = Config::from_lookup(lookup(&[("BULWARK_MAX_DELAY", "-1")])).unwrap_err();
        assert!(matches!(err, BulwarkError::Config(_)));
    }

    #[test]
    fn config_rejects_durations_too_large_to_represent() {
        for key in ["BULWARK_RECOVERY_TIMEOUT", "BULWARK_MAX_DELAY"] {
            let err = Config::from_lookup(lookup(&[(key, "1e20")])).unwrap_err();
            assert!(matches!(err, BulwarkError::Config(_)), "{key}");
        }

        let err = Config::from_lookup(lookup(&[(
            "BULWARK_BREAKERS",
            r#"{"search": {"recovery_timeout": 1e20}}"#,
        )]))
        .unwrap_err();
        assert!(matches!(err, BulwarkError::Config(_)));
    }

    #[test]
    fn large_but_representable_timeout_is_kept() {
        let cfg = Config::from_lookup(lookup(&[("BULWARK_RECOVERY_TIMEOUT", "1e9")])).unwrap();
        assert_eq!(cfg.recovery_timeout(), Duration::from_secs(1_000_000_000));
    }

    #[test]
    fn breaker_overrides_merge_with_defaults() {
        let cfg = Config::from_lookup(lookup(&[(
            "BULWARK_BREAKERS",
            r#"{"search": {"failure_threshold": 2, "recovery_timeout": 10}}"#,
        )]))
        .unwrap();

        let (failures, timeout, successes) = cfg.breaker_settings("search");
        assert_eq!(failures, 2);
        assert_eq!(timeout, Duration::from_secs(10));
        assert_eq!(successes, 3);

        assert_eq!(
            cfg.breaker_settings("llm"),
            (5, Duration::from_secs(60), 3)
        );
    }

    #[test]
    fn breaker_overrides_reject_bad_json() {
        let err = Config::from_lookup(lookup(&[("BULWARK_BREAKERS", "{not json")])).unwrap_err();
        assert!(err.to_string().contains("BULWARK_BREAKERS"));

        let err = Config::from_lookup(lookup(&[(
            "BULWARK_BREAKERS",
            r#"{"search": {"failure_threshold": 0}}"#,
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("search.failure_threshold"));
    }
}
