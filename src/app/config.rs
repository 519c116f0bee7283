//! Application configuration loading and logging setup.
//!
//! Configuration is loaded from a TOML file with environment variable
//! overrides for the leader's API secrets, which should never live in the
//! file itself.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::domain::{AccountDescriptor, ApiCredentials};
use crate::core::service::SyncConfig;
use crate::core::sizing::SizingConfig;
use crate::error::{Error, Result};

const LEADER_API_KEY_ENV: &str = "COPYHAWK_LEADER_API_KEY";
const LEADER_API_SECRET_ENV: &str = "COPYHAWK_LEADER_API_SECRET";
const LEADER_API_PASSPHRASE_ENV: &str = "COPYHAWK_LEADER_API_PASSPHRASE";

/// The leader account: identity in the file, secrets preferably from the
/// environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LeaderConfig {
    pub user_id: String,
    pub exchange_id: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_passphrase: Option<String>,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            user_id: "leader".to_string(),
            exchange_id: "binance".to_string(),
            api_key: None,
            api_secret: None,
            api_passphrase: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Path to the follower API-key store.
    pub path: PathBuf,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("keystore.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON log lines instead of the human format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub leader: LeaderConfig,
    pub keystore: KeystoreConfig,
    pub sizing: SizingConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment
    /// overrides. A missing file yields the defaults, so read-only commands
    /// work out of the box.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(api_key) = std::env::var(LEADER_API_KEY_ENV) {
            self.leader.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var(LEADER_API_SECRET_ENV) {
            self.leader.api_secret = Some(api_secret);
        }
        if let Ok(passphrase) = std::env::var(LEADER_API_PASSPHRASE_ENV) {
            self.leader.api_passphrase = Some(passphrase);
        }
    }

    /// The leader's full account descriptor.
    ///
    /// # Errors
    ///
    /// Fails when API key or secret are configured neither in the file nor
    /// in the environment.
    pub fn leader_descriptor(&self) -> Result<AccountDescriptor> {
        let api_key = self
            .leader
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::Config(format!("{LEADER_API_KEY_ENV} is not set")))?;
        let api_secret = self
            .leader
            .api_secret
            .clone()
            .filter(|secret| !secret.is_empty())
            .ok_or_else(|| Error::Config(format!("{LEADER_API_SECRET_ENV} is not set")))?;

        Ok(AccountDescriptor {
            user_id: self.leader.user_id.clone(),
            exchange_id: self.leader.exchange_id.to_lowercase(),
            credentials: ApiCredentials {
                api_key,
                api_secret,
                api_passphrase: self.leader.api_passphrase.clone(),
            },
            copy_enabled: false,
        })
    }

    /// Initialize the global tracing subscriber. `level_override` wins over
    /// the configured level; `RUST_LOG` wins over both. Logs go to stderr;
    /// stdout is reserved for execution reports.
    pub fn init_logging(&self, level_override: Option<&str>) {
        let level = level_override.unwrap_or(&self.logging.level);
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        if self.logging.json {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        } else {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}
