//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lower bound for the per-attempt HTTP timeout
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// `CODECKS_<NAME>` variables accepted without the `CODECKS_MCP_` prefix
const FLAT_ENV_KEYS: [&str; 4] = ["token", "account", "report_token", "user_id"];

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Upstream account and credentials
    pub codecks: CodecksConfig,
    /// HTTP transport tuning
    pub http: HttpConfig,
    /// Response contract presentation
    pub contract: ContractConfig,
}

/// Upstream account and credentials
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecksConfig {
    /// API base URL
    pub base_url: String,
    /// Session token (the `at` cookie of a logged-in browser session)
    pub token: Option<String>,
    /// Account slug (`<slug>.codecks.io`)
    pub account: Option<String>,
    /// Report token for the user-report endpoint
    pub report_token: Option<String>,
    /// Id of the user whose hand queue is managed
    pub user_id: Option<String>,
}

impl Default for CodecksConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.codecks.io".to_string(),
            token: None,
            account: None,
            report_token: None,
            user_id: None,
        }
    }
}

// Never print credentials, not even at trace level.
impl std::fmt::Debug for CodecksConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecksConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("account", &self.account)
            .field("report_token", &self.report_token.as_ref().map(|_| "<redacted>"))
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// HTTP transport tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Timeout per attempt
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Additional attempts for idempotent calls
    pub max_retries: u32,
    /// First backoff delay, doubled for every further attempt
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
    /// Ceiling for a single retry delay, server-requested ones included
    #[serde(with = "humantime_serde")]
    pub max_retry_delay: Duration,
    /// Response bodies above this size are rejected unparsed
    pub max_response_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            max_response_bytes: 5 * 1024 * 1024, // 5MB
        }
    }
}

/// Response contract presentation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractConfig {
    /// Presentation mode
    pub mode: ContractMode,
}

/// How successful results are presented to the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractMode {
    /// Success payload flattened at the top level
    #[default]
    Legacy,
    /// Success payload nested under `data`
    Envelope,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Env files may define any of the variables merged below.
        let pre: Self = figment
            .clone()
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        pre.load_env_files();

        figment = figment
            .merge(Env::prefixed("CODECKS_MCP_").split("__"))
            .merge(Env::raw().filter_map(|key| {
                FLAT_ENV_KEYS
                    .iter()
                    .find(|name| key.as_str().eq_ignore_ascii_case(&format!("codecks_{name}")))
                    .map(|name| format!("codecks.{name}").into())
            }));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.clamp();
        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    fn clamp(&mut self) {
        if self.http.timeout < MIN_TIMEOUT {
            tracing::warn!(
                configured_ms = self.http.timeout.as_millis(),
                "HTTP timeout below minimum, using 1s"
            );
            self.http.timeout = MIN_TIMEOUT;
        }
        if self.http.max_retry_delay < self.http.retry_base_delay {
            self.http.max_retry_delay = self.http.retry_base_delay;
        }
    }

    /// Check that the credentials needed for upstream calls are present
    ///
    /// # Errors
    ///
    /// Returns `Error::Setup` naming the first missing setting.
    pub fn validate(&self) -> Result<()> {
        let missing = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        if missing(&self.codecks.token) {
            return Err(Error::Setup(
                "CODECKS_TOKEN is not set; copy the `at` cookie from a logged-in browser session"
                    .to_string(),
            ));
        }
        if missing(&self.codecks.account) {
            return Err(Error::Setup("CODECKS_ACCOUNT is not set".to_string()));
        }
        url::Url::parse(&self.codecks.base_url)
            .map_err(|e| Error::Config(format!("Invalid base_url: {e}")))?;
        Ok(())
    }
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else {
            // Assume seconds
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.codecks.base_url, "https://api.codecks.io");
        assert_eq!(config.http.max_retries, 2);
        assert_eq!(config.contract.mode, ContractMode::Legacy);
    }

    #[test]
    fn yaml_file_is_merged_and_timeout_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codecks.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
codecks:
  base_url: "http://127.0.0.1:9"
  account: "studio"
http:
  timeout: "200ms"
  max_retries: 4
  retry_base_delay: "50ms"
  max_retry_delay: "2s"
contract:
  mode: envelope
"#
        )
        .unwrap();
        drop(f);

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.codecks.base_url, "http://127.0.0.1:9");
        assert_eq!(config.codecks.account.as_deref(), Some("studio"));
        assert_eq!(config.http.timeout, MIN_TIMEOUT);
        assert_eq!(config.http.max_retries, 4);
        assert_eq!(config.http.retry_base_delay, Duration::from_millis(50));
        assert_eq!(config.http.max_retry_delay, Duration::from_secs(2));
        assert_eq!(config.contract.mode, ContractMode::Envelope);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/codecks.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn validate_requires_token_and_account() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(Error::Setup(_))));

        config.codecks.token = Some("tok".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("CODECKS_ACCOUNT"));

        config.codecks.account = Some("studio".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let config = CodecksConfig {
            token: Some("super-secret".into()),
            report_token: Some("also-secret".into()),
            ..CodecksConfig::default()
        };
        let printed = format!("{config:?}");
        assert!(!printed.contains("super-secret"));
        assert!(!printed.contains("also-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn humantime_parses_units() {
        assert_eq!(humantime_serde::parse("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(humantime_serde::parse("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(humantime_serde::parse("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(humantime_serde::parse("7").unwrap(), Duration::from_secs(7));
    }

    #[test]
    fn env_files_deserialized_from_yaml() {
        let yaml = r"
env_files:
  - ~/.config/codecks/.env
codecks:
  account: studio
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.env_files, vec!["~/.config/codecks/.env".to_string()]);
        assert_eq!(config.codecks.base_url, "https://api.codecks.io");
    }
}
