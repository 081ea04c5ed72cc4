//! Wardgate Config — the two startup documents.
//!
//! The gateway is configured once, at startup, from a runtime document
//! (`config.toml`) and a policy document (`permissions.toml`). `${VAR}`
//! references in string values are substituted from the environment before
//! validation; an unset referenced variable is fatal. Hot reload is
//! deliberately unsupported.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod env;
pub mod error;
mod load;
pub mod types;

pub use error::{ConfigError, ConfigResult};
pub use load::{load_config, load_config_with_env, load_permissions, load_permissions_with_env};
pub use types::{
    AgentConfig, Config, GatewayConfig, HomeAssistantConfig, MessengerConfig, RateLimitConfig,
    ServicesConfig, StorageConfig, TelegramConfig, TlsConfig,
};
