#![forbid(unsafe_code)]

//! Planner configuration as data.
//!
//! Every tunable of a planning session (server location, endpoint paths,
//! storage key, sync debounce, file-poll schedule) lives in one
//! [`PlannerConfig`] that can be loaded from TOML or JSON at startup.
//!
//! # Loading
//!
//! ```toml
//! # kplan.toml
//! base_url = "http://127.0.0.1:5000"
//! sync_debounce_ms = 250
//!
//! [endpoints]
//! submit = "/allocate_slots_endpoint"
//!
//! [file_poll]
//! interval_ms = 3000
//! max_attempts = 20
//! ```
//!
//! ```rust,ignore
//! let config = PlannerConfig::from_toml_file("kplan.toml")?;
//! ```
//!
//! # Defaults
//!
//! `PlannerConfig::default()` reproduces the behavior of the hosted planner:
//! same-origin relative endpoints, immediate map sync, and a 3 s × 20 file
//! poll.

use std::path::Path;

use kplan_core::{DEFAULT_STORAGE_KEY, SUGGESTION_LIMIT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_time::Duration;

use crate::retry::{BackoffStrategy, FILE_POLL_INTERVAL_MS, FILE_POLL_MAX_RETRIES, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ---------------------------------------------------------------------------
// Top-level PlannerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Prefix for every endpoint path. Empty means same-origin relative URLs.
    pub base_url: String,

    pub endpoints: EndpointConfig,

    /// Key the station list is persisted under.
    pub storage_key: String,

    /// Quiet period before a map sync is dispatched.
    pub sync_debounce_ms: u64,

    pub file_poll: FilePollConfig,

    /// Maximum Kavach ID suggestions shown for a prefix.
    pub suggestion_limit: usize,

    /// Whole-request timeout for the HTTP client.
    pub http_timeout_secs: u64,

    pub http_connect_timeout_secs: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            endpoints: EndpointConfig::default(),
            storage_key: DEFAULT_STORAGE_KEY.to_owned(),
            sync_debounce_ms: 0,
            file_poll: FilePollConfig::default(),
            suggestion_limit: SUGGESTION_LIMIT,
            http_timeout_secs: 60,
            http_connect_timeout_secs: 5,
        }
    }
}

impl PlannerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.base_url.ends_with('/') {
            errors.push(format!(
                "base_url must not end with '/', got {:?}",
                self.base_url
            ));
        }
        for (name, path) in self.endpoints.named() {
            if !path.starts_with('/') {
                errors.push(format!("endpoints.{name} must start with '/', got {path:?}"));
            }
        }
        if self.storage_key.trim().is_empty() {
            errors.push("storage_key must not be empty".into());
        }
        match &self.file_poll.backoff {
            None if self.file_poll.interval_ms == 0 => {
                errors.push("file_poll.interval_ms must be > 0".into());
            }
            Some(BackoffStrategy::Fixed { delay_ms: 0 }) => {
                errors.push("file_poll.backoff.delay_ms must be > 0".into());
            }
            Some(
                BackoffStrategy::Exponential { base_ms, max_ms }
                | BackoffStrategy::Linear { base_ms, max_ms },
            ) if *base_ms == 0 || max_ms < base_ms => {
                errors.push(format!(
                    "file_poll.backoff needs 0 < base_ms <= max_ms, got {base_ms} and {max_ms}"
                ));
            }
            _ => {}
        }
        if self.suggestion_limit == 0 {
            errors.push("suggestion_limit must be > 0".into());
        }
        if self.http_timeout_secs == 0 {
            errors.push("http_timeout_secs must be > 0".into());
        }
        if self.http_connect_timeout_secs > self.http_timeout_secs {
            errors.push(format!(
                "http_connect_timeout_secs ({}) exceeds http_timeout_secs ({})",
                self.http_connect_timeout_secs, self.http_timeout_secs
            ));
        }

        errors
    }

    /// `validate()` as a `Result`.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Absolute (or same-origin) URL for an endpoint path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        format!("{}{}", self.base_url, path)
    }

    #[must_use]
    pub fn sync_debounce(&self) -> Duration {
        Duration::from_millis(self.sync_debounce_ms)
    }

    #[must_use]
    pub fn file_poll_policy(&self) -> RetryPolicy {
        self.file_poll.policy()
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub update_map: String,
    pub run_allocation: String,
    pub submit: String,
    pub lookup: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            update_map: "/api/update_map".into(),
            run_allocation: "/api/run_allocation".into(),
            submit: "/allocate_slots_endpoint".into(),
            lookup: "/static/skavidLookup.json".into(),
        }
    }
}

impl EndpointConfig {
    fn named(&self) -> [(&'static str, &str); 4] {
        [
            ("update_map", &self.update_map),
            ("run_allocation", &self.run_allocation),
            ("submit", &self.submit),
            ("lookup", &self.lookup),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePollConfig {
    pub interval_ms: u64,
    /// Retries after the first probe before giving up.
    pub max_attempts: u32,
    /// Replaces the fixed `interval_ms` schedule when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffStrategy>,
}

impl Default for FilePollConfig {
    fn default() -> Self {
        Self {
            interval_ms: FILE_POLL_INTERVAL_MS,
            max_attempts: FILE_POLL_MAX_RETRIES,
            backoff: None,
        }
    }
}

impl FilePollConfig {
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        let backoff = self.backoff.clone().unwrap_or(BackoffStrategy::Fixed {
            delay_ms: self.interval_ms,
        });
        RetryPolicy::new(self.max_attempts, backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PlannerConfig::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
        assert_eq!(config.file_poll_policy(), RetryPolicy::file_poll());
        assert_eq!(config.storage_key, "planningStations");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PlannerConfig::from_toml_str(
            r#"
            base_url = "http://planner.local:5000"
            sync_debounce_ms = 250

            [endpoints]
            submit = "/v2/submit"
            "#,
        )
        .expect("parse");
        assert_eq!(config.sync_debounce(), Duration::from_millis(250));
        assert_eq!(config.endpoints.submit, "/v2/submit");
        assert_eq!(config.endpoints.update_map, "/api/update_map");
        assert_eq!(
            config.url(&config.endpoints.submit),
            "http://planner.local:5000/v2/submit"
        );
        assert_eq!(config.file_poll.max_attempts, 20);
    }

    #[test]
    fn json_config_parses() {
        let config = PlannerConfig::from_json_str(
            r#"{"file_poll": {"interval_ms": 500}, "suggestion_limit": 5}"#,
        )
        .expect("parse");
        assert_eq!(config.file_poll.interval_ms, 500);
        assert_eq!(config.file_poll.max_attempts, 20);
        assert_eq!(config.suggestion_limit, 5);
    }

    #[test]
    fn absolute_urls_pass_through() {
        let config = PlannerConfig {
            base_url: "http://a".into(),
            ..PlannerConfig::default()
        };
        assert_eq!(config.url("https://cdn/file.xlsx"), "https://cdn/file.xlsx");
        assert_eq!(config.url("/x"), "http://a/x");
    }

    #[test]
    fn validate_collects_every_problem() {
        let mut config = PlannerConfig::default();
        config.base_url = "http://a/".into();
        config.endpoints.lookup = "static/x.json".into();
        config.file_poll.interval_ms = 0;
        config.suggestion_limit = 0;
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("base_url")));
        assert!(errors.iter().any(|e| e.contains("endpoints.lookup")));
        assert!(errors.iter().any(|e| e.contains("file_poll.interval_ms")));
        assert!(errors.iter().any(|e| e.contains("suggestion_limit")));
        assert!(matches!(
            config.validated(),
            Err(ConfigError::Validation(errors)) if errors.len() == 4
        ));
    }

    #[test]
    fn file_poll_backoff_replaces_the_fixed_interval() {
        let config = PlannerConfig::from_toml_str(
            r#"
            [file_poll]
            max_attempts = 4

            [file_poll.backoff]
            kind = "exponential"
            base_ms = 500
            max_ms = 2000
            "#,
        )
        .expect("parse");
        assert!(config.validate().is_empty(), "{:?}", config.validate());
        let policy = config.file_poll_policy();
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(3), Duration::from_millis(2000));
        assert_eq!(policy.total_max_delay(), Duration::from_millis(5500));

        let linear = PlannerConfig::from_json_str(
            r#"{"file_poll": {"backoff": {"kind": "linear", "base_ms": 100, "max_ms": 250}}}"#,
        )
        .expect("parse");
        assert_eq!(linear.file_poll_policy().delay(1), Duration::from_millis(200));
        assert_eq!(linear.file_poll_policy().max_retries, 20);
    }

    #[test]
    fn degenerate_backoff_is_rejected() {
        let mut config = PlannerConfig::default();
        config.file_poll.backoff = Some(BackoffStrategy::Linear {
            base_ms: 400,
            max_ms: 100,
        });
        let errors = config.validate();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("file_poll.backoff"));

        config.file_poll.backoff = Some(BackoffStrategy::Fixed { delay_ms: 0 });
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(matches!(
            PlannerConfig::from_toml_str("sync_debounce_ms = \"soon\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            PlannerConfig::from_toml_file(dir.path().join("absent.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
