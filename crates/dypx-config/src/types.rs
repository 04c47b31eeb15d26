//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [backend]        # CUBE connection
//! [retry]          # transport retry policy
//! [monitor]        # background workflow monitor
//! [waiter]         # blocking node waiter
//! [notification]   # failure notification plugin
//! [batch]          # spreadsheet batch defaults
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Transport kinds understood by the client.
pub const TRANSPORT_KINDS: &[&str] = &["token", "session"];

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged. Accessors fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DypxConfig {
    /// Backend connection.
    pub backend: Option<BackendConfig>,
    /// Retry policy for backend calls.
    pub retry: Option<RetrySection>,
    /// Workflow monitor settings.
    pub monitor: Option<MonitorSection>,
    /// Node waiter settings.
    pub waiter: Option<WaiterSection>,
    /// Notification plugin settings.
    pub notification: Option<NotificationSection>,
    /// Batch run defaults.
    pub batch: Option<BatchSection>,
}

impl DypxConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: DypxConfig) {
        if other.backend.is_some() {
            self.backend = other.backend;
        }
        if other.retry.is_some() {
            self.retry = other.retry;
        }
        if other.monitor.is_some() {
            self.monitor = other.monitor;
        }
        if other.waiter.is_some() {
            self.waiter = other.waiter;
        }
        if other.notification.is_some() {
            self.notification = other.notification;
        }
        if other.batch.is_some() {
            self.batch = other.batch;
        }
    }

    /// Backend section or defaults.
    pub fn backend(&self) -> BackendConfig {
        self.backend.clone().unwrap_or_default()
    }

    /// Retry section or defaults.
    pub fn retry(&self) -> RetrySection {
        self.retry.clone().unwrap_or_default()
    }

    /// Monitor section or defaults.
    pub fn monitor(&self) -> MonitorSection {
        self.monitor.clone().unwrap_or_default()
    }

    /// Waiter section or defaults.
    pub fn waiter(&self) -> WaiterSection {
        self.waiter.clone().unwrap_or_default()
    }

    /// Notification section or defaults.
    pub fn notification(&self) -> NotificationSection {
        self.notification.clone().unwrap_or_default()
    }

    /// Batch section or defaults.
    pub fn batch(&self) -> BatchSection {
        self.batch.clone().unwrap_or_default()
    }

    /// Check values that cannot be expressed in the schema.
    pub fn validate(&self) -> Result<()> {
        let backend = self.backend();
        if backend.url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "url".to_string(),
                context: "[backend]".to_string(),
            });
        }
        if !TRANSPORT_KINDS.contains(&backend.transport.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "backend.transport".to_string(),
                value: backend.transport.clone(),
                reason: format!("expected one of {}", TRANSPORT_KINDS.join(", ")),
            });
        }
        if backend.transport == "session" && backend.username.is_empty() {
            return Err(ConfigError::MissingField {
                field: "username".to_string(),
                context: "[backend] with transport = \"session\"".to_string(),
            });
        }

        let retry = self.retry();
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        if retry.min_delay_secs > retry.max_delay_secs {
            return Err(ConfigError::InvalidValue {
                field: "retry.min_delay_secs".to_string(),
                value: retry.min_delay_secs.to_string(),
                reason: "must not exceed retry.max_delay_secs".to_string(),
            });
        }

        if self.monitor().poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "monitor.poll_interval_secs".to_string(),
                value: "0".to_string(),
                reason: "poll interval must be positive".to_string(),
            });
        }
        if self.waiter().poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "waiter.poll_interval_secs".to_string(),
                value: "0".to_string(),
                reason: "poll interval must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// True when a token is stored in the config file itself.
    pub fn has_plaintext_token(&self) -> bool {
        self.backend
            .as_ref()
            .is_some_and(|b| !b.token.is_empty() || !b.password.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// CUBE connection settings.
///
/// ```toml
/// [backend]
/// url = "http://localhost:8000/api/v1/"
/// transport = "token"
/// token = ""
/// timeout_secs = 30
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// API root, including the version segment.
    pub url: String,
    /// `token` or `session`.
    pub transport: String,
    /// API token for the token transport.
    pub token: String,
    /// Username for the session transport.
    pub username: String,
    /// Password for the session transport.
    pub password: String,
    /// Per-attempt request timeout.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/api/v1/".to_string(),
            transport: "token".to_string(),
            token: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Retry policy for backend calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub multiplier_secs: u64,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            multiplier_secs: 1,
            min_delay_secs: 2,
            max_delay_secs: 10,
        }
    }
}

/// Background workflow monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    /// Seconds between job-counter polls.
    pub poll_interval_secs: u64,
    /// Send a completion notice when a workflow succeeds.
    pub notify_on_success: bool,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 20,
            notify_on_success: false,
        }
    }
}

/// Blocking node waiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaiterSection {
    /// Seconds between status polls.
    pub poll_interval_secs: u64,
    /// Maximum polls before giving up; 0 polls without bound.
    pub max_polls: u32,
}

impl Default for WaiterSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_polls: 100,
        }
    }
}

/// Notification plugin settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSection {
    pub plugin_name: String,
    pub plugin_version: String,
    pub sender: String,
    pub smtp_server: String,
    /// Comma-separated recipient list.
    pub recipients: String,
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            plugin_name: "pl-notification".to_string(),
            plugin_version: "0.1.0".to_string(),
            sender: "noreply@fnndsc.org".to_string(),
            smtp_server: String::new(),
            recipients: String::new(),
        }
    }
}

/// Spreadsheet batch defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    /// Pipeline launched for every row.
    pub pipeline: String,
    /// Node the blocking flow waits on.
    pub wait_for_node: String,
    /// PACS to query and retrieve from.
    pub pacs_name: String,
    /// pfdcm service endpoint.
    pub pfdcm_url: String,
    /// Rows processed concurrently in parallel mode.
    pub max_parallel: usize,
    /// Glob for input spreadsheets.
    pub pattern: String,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            pipeline: "PACS query, retrieve, registration verification, and run pipeline in CUBE 20250331"
                .to_string(),
            wait_for_node: "verify-registration".to_string(),
            pacs_name: "MINICHRISORTHANC".to_string(),
            pfdcm_url: String::new(),
            max_parallel: 4,
            pattern: "**/*csv".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config = DypxConfig::from_toml("").unwrap();
        assert!(config.backend.is_none());
        assert_eq!(config.backend().transport, "token");
        assert_eq!(config.monitor().poll_interval_secs, 20);
        assert_eq!(config.waiter().max_polls, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_defaults() {
        let retry = RetrySection::default();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.min_delay_secs, 2);
        assert_eq!(retry.max_delay_secs, 10);
    }

    #[test]
    fn test_parse_full_example() {
        let toml = r#"
[backend]
url = "http://cube.local/api/v1/"
transport = "session"
username = "chris"
password = "chris1234"

[retry]
max_attempts = 3

[monitor]
poll_interval_secs = 30
notify_on_success = true

[waiter]
max_polls = 0

[notification]
smtp_server = "mail.local"
recipients = "a@b.c"

[batch]
pacs_name = "PACSDCM"
max_parallel = 8
"#;
        let config = DypxConfig::from_toml(toml).unwrap();
        let backend = config.backend();
        assert_eq!(backend.url, "http://cube.local/api/v1/");
        assert_eq!(backend.transport, "session");
        assert_eq!(backend.timeout_secs, 30);
        assert_eq!(config.retry().max_attempts, 3);
        assert_eq!(config.retry().max_delay_secs, 10);
        assert!(config.monitor().notify_on_success);
        assert_eq!(config.waiter().max_polls, 0);
        assert_eq!(config.waiter().poll_interval_secs, 5);
        assert_eq!(config.notification().plugin_name, "pl-notification");
        assert_eq!(config.notification().recipients, "a@b.c");
        assert_eq!(config.batch().max_parallel, 8);
        assert!(config.validate().is_ok());
        assert!(config.has_plaintext_token());
    }

    #[test]
    fn test_merge_override() {
        let mut base = DypxConfig::from_toml(
            r#"
[backend]
url = "http://a/api/v1/"
[monitor]
poll_interval_secs = 10
"#,
        )
        .unwrap();
        let overlay = DypxConfig::from_toml(
            r#"
[backend]
url = "http://b/api/v1/"
"#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.backend().url, "http://b/api/v1/");
        assert_eq!(base.monitor().poll_interval_secs, 10);
    }

    #[test]
    fn test_validate_rejects_unknown_transport() {
        let config = DypxConfig::from_toml("[backend]\ntransport = \"sdk\"\n").unwrap();
        match config.validate().unwrap_err() {
            ConfigError::InvalidValue { field, .. } => assert_eq!(field, "backend.transport"),
            other => panic!("Expected InvalidValue, got: {other:?}"),
        }
    }

    #[test]
    fn test_validate_requires_url() {
        let config = DypxConfig::from_toml("[backend]\nurl = \"\"\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_validate_session_needs_username() {
        let config = DypxConfig::from_toml("[backend]\ntransport = \"session\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_retry_window() {
        let config =
            DypxConfig::from_toml("[retry]\nmin_delay_secs = 20\nmax_delay_secs = 10\n").unwrap();
        assert!(config.validate().is_err());

        let config = DypxConfig::from_toml("[retry]\nmax_attempts = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_poll_intervals() {
        let config = DypxConfig::from_toml("[monitor]\npoll_interval_secs = 0\n").unwrap();
        assert!(config.validate().is_err());

        let config =
            DypxConfig::from_toml("[waiter]\npoll_interval_secs = 0\nmax_polls = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("waiter.poll_interval_secs"));

        let config = DypxConfig::from_toml("[waiter]\nmax_polls = 0\n").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_roundtrip_toml() {
        let mut config = DypxConfig::new();
        config.waiter = Some(WaiterSection {
            poll_interval_secs: 1,
            max_polls: 3,
        });
        let text = config.to_toml().unwrap();
        let parsed = DypxConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.waiter().max_polls, 3);
        assert!(parsed.backend.is_none());
    }
}
