//! Typed configuration schema.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

/// Default approval window in seconds.
const DEFAULT_APPROVAL_TIMEOUT: u64 = 900;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Transport binding and TLS material.
    pub gateway: GatewayConfig,
    /// Agent authentication.
    pub agent: AgentConfig,
    /// Approval channel.
    pub messenger: MessengerConfig,
    /// Downstream services.
    pub services: ServicesConfig,
    /// Durable store location.
    pub storage: StorageConfig,
    /// Seconds an `ask` request waits for a human decision.
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout: u64,
    /// Request-rate and pending-cap knobs.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_approval_timeout() -> u64 {
    DEFAULT_APPROVAL_TIMEOUT
}

/// WebSocket listener binding.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// TLS material; without it the gateway only starts under `--insecure`.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// Paths to PEM-encoded TLS material.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// Certificate chain.
    pub cert: PathBuf,
    /// Private key.
    pub key: PathBuf,
}

/// Agent-side authentication.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Bearer token the agent must present in its `auth` frame.
    pub token: String,
}

/// Approval channel selection plus backend-specific settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessengerConfig {
    /// Backend type; only `telegram` is supported.
    #[serde(rename = "type")]
    pub kind: String,
    /// Telegram settings, required when `type = "telegram"`.
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

/// Telegram backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    /// Bot API token.
    pub token: String,
    /// Chat that receives approval prompts.
    pub chat_id: i64,
    /// Closed set of user ids whose button presses are honored.
    pub allowed_users: Vec<u64>,
}

/// Downstream service endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServicesConfig {
    /// Home Assistant endpoint and credentials.
    pub homeassistant: HomeAssistantConfig,
}

/// Home Assistant REST endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HomeAssistantConfig {
    /// Base URL, e.g. `http://homeassistant.local:8123`.
    pub url: String,
    /// Long-lived access token.
    pub token: String,
}

/// Durable store location.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Store type; only `sqlite` is supported.
    #[serde(rename = "type")]
    pub kind: String,
    /// Database file path.
    pub path: PathBuf,
}

/// Request-rate and pending-approval limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RateLimitConfig {
    /// Concurrent `ask` approvals allowed to be outstanding.
    pub max_pending_approvals: usize,
    /// Sliding-window cap on incoming `tool_request` frames.
    pub max_requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_pending_approvals: 10,
            max_requests_per_minute: 60,
        }
    }
}

impl Config {
    /// Cross-field validation that serde cannot express.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first violated constraint.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.agent.token.is_empty() {
            return Err(ConfigError::Invalid(
                "agent.token must not be empty".to_string(),
            ));
        }
        if self.messenger.kind != "telegram" {
            return Err(ConfigError::Invalid(format!(
                "unsupported messenger type: {:?} (only \"telegram\" is supported)",
                self.messenger.kind
            )));
        }
        let Some(telegram) = &self.messenger.telegram else {
            return Err(ConfigError::Invalid(
                "messenger.telegram section is required".to_string(),
            ));
        };
        if telegram.allowed_users.is_empty() {
            return Err(ConfigError::Invalid(
                "messenger.telegram.allowed_users must be a non-empty list".to_string(),
            ));
        }
        if self.storage.kind != "sqlite" {
            return Err(ConfigError::Invalid(format!(
                "unsupported storage type: {:?} (only \"sqlite\" is supported)",
                self.storage.kind
            )));
        }
        if self.approval_timeout == 0 {
            return Err(ConfigError::Invalid(
                "approval_timeout must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}
