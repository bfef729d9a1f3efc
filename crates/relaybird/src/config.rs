use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use relaybird_protocol::Visibility;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use url::Url;

use crate::stream::RetryPolicy;

/// Environment variable consulted when the config carries no bearer token.
pub const BEARER_TOKEN_ENV: &str = "TWITTER_BEARER_TOKEN";

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub twitter: TwitterSettings,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Read and parse `path`, filling the bearer token from the environment
    /// when the file leaves it out. Does not validate.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).await?;
        let mut config = Self::parse(&contents)?;
        config.twitter.bearer_token = resolve_bearer_token(
            config.twitter.bearer_token.take(),
            std::env::var(BEARER_TOKEN_ENV).ok(),
        );
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_saphyr::from_str(contents)?)
    }

    /// Check everything the relay needs before it connects anywhere.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.twitter.bearer_token.is_none() {
            return Err(ConfigError::Invalid(format!(
                "twitter.bearer_token is not set (nor is {BEARER_TOKEN_ENV})"
            )));
        }
        validate_http_url("twitter.api_url", &self.twitter.api_url)?;
        validate_http_url("twitter.profile_url", &self.twitter.profile_url)?;

        self.stream.validate()?;

        if self.routes.is_empty() {
            return Err(ConfigError::Invalid("no routes configured".to_string()));
        }
        let mut sources = HashSet::new();
        for (i, route) in self.routes.iter().enumerate() {
            if route.source.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("routes[{i}].source is empty")));
            }
            if !sources.insert(route.source.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "routes[{i}]: duplicate source {}",
                    route.source
                )));
            }
            validate_http_url(
                &format!("routes[{i}].destination.instance_url"),
                &route.destination.instance_url,
            )?;
            if route.destination.token.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "routes[{i}].destination.token is empty"
                )));
            }
        }
        Ok(())
    }
}

/// Prefer a non-blank configured token, else a non-blank environment value.
pub fn resolve_bearer_token(configured: Option<String>, env: Option<String>) -> Option<String> {
    configured
        .filter(|t| !t.trim().is_empty())
        .or(env.filter(|t| !t.trim().is_empty()))
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(ConfigError::Invalid(format!(
            "{field}: unsupported scheme {}",
            url.scheme()
        ))),
        Err(e) => Err(ConfigError::Invalid(format!("{field}: {e}"))),
    }
}

// ============================================================================
// TwitterSettings
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TwitterSettings {
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Web root used for profile and post links.
    #[serde(default = "default_profile_url")]
    pub profile_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for TwitterSettings {
    fn default() -> Self {
        Self {
            bearer_token: None,
            api_url: default_api_url(),
            profile_url: default_profile_url(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl TwitterSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn default_api_url() -> String {
    "https://api.twitter.com".to_string()
}

fn default_profile_url() -> String {
    "https://twitter.com".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

// ============================================================================
// StreamSettings
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_true")]
    pub reconnect: bool,
    /// -1 retries forever.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_seconds: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect: true,
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            stall_timeout_seconds: default_stall_timeout(),
        }
    }
}

impl StreamSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            enabled: self.reconnect,
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
        }
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries < -1 {
            return Err(ConfigError::Invalid(
                "stream.max_retries must be -1 (unlimited) or greater".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "stream.multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(
                "stream.initial_delay_ms exceeds stream.max_delay_ms".to_string(),
            ));
        }
        if self.stall_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "stream.stall_timeout_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> i64 {
    -1
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_stall_timeout() -> u64 {
    90
}

// ============================================================================
// RouteConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RouteConfig {
    /// Source account id.
    pub source: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log label for the destination; defaults to its instance host.
    #[serde(default)]
    pub name: Option<String>,
    pub destination: DestinationConfig,
}

impl RouteConfig {
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            Url::parse(&self.destination.instance_url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| self.destination.instance_url.clone())
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct DestinationConfig {
    pub instance_url: String,
    pub token: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default = "default_destination_timeout")]
    pub timeout_seconds: u64,
}

fn default_destination_timeout() -> u64 {
    60
}

// ============================================================================
// LoggingConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// Tests
// ============================================================================
