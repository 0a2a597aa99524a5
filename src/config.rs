//! Client configuration.
//!
//! Sources, later ones winning: built-in defaults, an optional TOML file,
//! `SHADOW_SYNC_*` environment variables (a `.env` file is loaded first when
//! present), then command line flags applied by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::ClientConfig;
use crate::error::ConfigError;
use crate::store::log::{DEFAULT_EVENT_LOG, MAX_EVENT_LOG, MIN_EVENT_LOG};
use crate::store::samples::DEFAULT_SAMPLE_CAPACITY;
use crate::store::StoreConfig;
use crate::transport::SessionConfig;

pub const ENV_BROKER_URL: &str = "SHADOW_SYNC_BROKER_URL";
pub const ENV_DEPLOY_URL: &str = "SHADOW_SYNC_DEPLOY_URL";
pub const ENV_PROJECT_ID: &str = "SHADOW_SYNC_PROJECT_ID";
pub const ENV_TOKEN: &str = "SHADOW_SYNC_TOKEN";
pub const ENV_POLL_MS: &str = "SHADOW_SYNC_POLL_MS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub broker_url: String,
    pub deploy_url: Option<String>,
    pub project_id: Option<String>,
    pub client_type: String,
    pub heartbeat_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub event_log_capacity: usize,
    pub sample_capacity: usize,
    /// Enables the polling fallback when set.
    pub poll_interval_ms: Option<u64>,
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    pub logging: LoggingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            broker_url: "ws://127.0.0.1:8787/ws".to_string(),
            deploy_url: None,
            project_id: None,
            client_type: "desktop".to_string(),
            heartbeat_interval_ms: 5_000,
            reconnect_delay_ms: 5_000,
            event_log_capacity: DEFAULT_EVENT_LOG,
            sample_capacity: DEFAULT_SAMPLE_CAPACITY,
            poll_interval_ms: None,
            auth_token: None,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files. Console only when unset.
    pub directory: Option<PathBuf>,
    /// Filter used when neither `SHADOW_SYNC_LOG` nor `RUST_LOG` is set.
    pub level: Option<String>,
}

impl SyncConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        dotenvy::dotenv().ok();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Overlay `SHADOW_SYNC_*` values from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BROKER_URL) {
            self.broker_url = url;
        }
        if let Some(url) = lookup(ENV_DEPLOY_URL) {
            self.deploy_url = Some(url);
        }
        if let Some(project) = lookup(ENV_PROJECT_ID) {
            self.project_id = Some(project);
        }
        if let Some(token) = lookup(ENV_TOKEN) {
            self.auth_token = Some(token);
        }
        if let Some(raw) = lookup(ENV_POLL_MS) {
            let ms = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: format!("{ENV_POLL_MS}={raw} is not a number of milliseconds"),
            })?;
            self.poll_interval_ms = Some(ms);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("broker_url", &self.broker_url, &["ws", "wss"])?;
        if let Some(deploy) = &self.deploy_url {
            check_url("deploy_url", deploy, &["http", "https"])?;
        }
        for (field, value) in [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("poll_interval_ms", self.poll_interval_ms.unwrap_or(1)),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.sample_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "sample_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            client_type: self.client_type.clone(),
            project_id: self.project_id.clone(),
        }
    }

    /// Event log capacity is clamped into the supported retention window.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            event_log_capacity: self.event_log_capacity.clamp(MIN_EVENT_LOG, MAX_EVENT_LOG),
            sample_capacity: self.sample_capacity,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            session: self.session_config(),
            store: self.store_config(),
        }
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }
}

fn check_url(field: &'static str, raw: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
        field,
        reason: format!("{raw}: {e}"),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("scheme must be one of {}, got {}", schemes.join("/"), url.scheme()),
        });
    }
    Ok(())
}
