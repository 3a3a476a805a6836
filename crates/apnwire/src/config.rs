//! Client configuration.
//!
//! Loading flow:
//! 1. Start with [`ClientConfig::default()`] (sandbox, no certificate)
//! 2. If the config file exists, parse it; missing keys keep their defaults
//! 3. Apply `APNWIRE_*` environment overrides (highest priority)
//!
//! Invalid environment values are ignored with a warning.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::channel::feedback::DEFAULT_RECONNECT_DELAY;
use crate::errors::ConfigError;
use crate::transport::tcp::DEFAULT_CONNECT_TIMEOUT;
use crate::transport::{Endpoint, TlsConfig};

/// Gateway port for notification delivery.
pub const GATEWAY_PORT: u16 = 2195;
/// Feedback service port.
pub const FEEDBACK_PORT: u16 = 2196;

/// Target service environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development gateway.
    #[default]
    Sandbox,
    /// Production gateway.
    Production,
}

impl Environment {
    /// Gateway host for this environment.
    pub fn gateway_host(self) -> &'static str {
        match self {
            Self::Sandbox => "gateway.sandbox.push.apple.com",
            Self::Production => "gateway.push.apple.com",
        }
    }

    /// Feedback host for this environment.
    pub fn feedback_host(self) -> &'static str {
        match self {
            Self::Sandbox => "feedback.sandbox.push.apple.com",
            Self::Production => "feedback.push.apple.com",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "development" => Ok(Self::Sandbox),
            "production" => Ok(Self::Production),
            other => Err(format!("unknown environment `{other}`")),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Sandbox or production.
    pub environment: Environment,
    /// PEM certificate path, handed to the transport.
    pub cert_path: Option<String>,
    /// PEM private key path, handed to the transport.
    pub key_path: Option<String>,
    /// Override for the gateway `host:port`.
    pub gateway: Option<Endpoint>,
    /// Override for the feedback `host:port`.
    pub feedback: Option<Endpoint>,
    /// Delay before reconnecting a closed feedback connection.
    pub feedback_reconnect_delay_ms: u64,
    /// Idle timeout for gateway connections; `None` disables it.
    pub gateway_idle_timeout_secs: Option<u64>,
    /// TCP connect timeout used by the bundled transport.
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Sandbox,
            cert_path: None,
            key_path: None,
            gateway: None,
            feedback: None,
            feedback_reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            gateway_idle_timeout_secs: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
        }
    }
}

impl ClientConfig {
    /// Config for `environment` with everything else default.
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            ..Self::default()
        }
    }

    /// Gateway endpoint: the override, or the environment's host on 2195.
    pub fn gateway_endpoint(&self) -> Endpoint {
        self.gateway
            .clone()
            .unwrap_or_else(|| Endpoint::new(self.environment.gateway_host(), GATEWAY_PORT))
    }

    /// Feedback endpoint: the override, or the environment's host on 2196.
    pub fn feedback_endpoint(&self) -> Endpoint {
        self.feedback
            .clone()
            .unwrap_or_else(|| Endpoint::new(self.environment.feedback_host(), FEEDBACK_PORT))
    }

    /// Certificate and key paths with `~` expanded.
    pub fn tls(&self) -> TlsConfig {
        TlsConfig {
            cert_path: self.cert_path.as_deref().map(expand_home),
            key_path: self.key_path.as_deref().map(expand_home),
        }
    }

    /// Feedback reconnect delay.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.feedback_reconnect_delay_ms)
    }

    /// Gateway idle timeout, if enabled.
    pub fn gateway_idle_timeout(&self) -> Option<Duration> {
        self.gateway_idle_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }

    /// Connect timeout for the bundled TCP transport.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Expand a leading `~` against `HOME`.
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

/// Default config file location (`~/.apnwire/config.json`).
pub fn config_path() -> PathBuf {
    expand_home("~/.apnwire/config.json")
}

/// Load config from the default path with env overrides.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(&config_path())
}

/// Load config from `path` with env overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_config_from_path(path: &Path) -> Result<ClientConfig, ConfigError> {
    let mut config = if path.exists() {
        debug!(?path, "loading config from file");
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)?
    } else {
        debug!(?path, "config file not found, using defaults");
        ClientConfig::default()
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Apply `APNWIRE_*` environment overrides.
pub fn apply_env_overrides(config: &mut ClientConfig) {
    if let Some(v) = read_env_parsed::<Environment>("APNWIRE_ENVIRONMENT") {
        config.environment = v;
    }
    if let Some(v) = read_env_string("APNWIRE_CERT_PATH") {
        config.cert_path = Some(v);
    }
    if let Some(v) = read_env_string("APNWIRE_KEY_PATH") {
        config.key_path = Some(v);
    }
    if let Some(v) = read_env_parsed::<Endpoint>("APNWIRE_GATEWAY") {
        config.gateway = Some(v);
    }
    if let Some(v) = read_env_parsed::<Endpoint>("APNWIRE_FEEDBACK") {
        config.feedback = Some(v);
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_env_parsed<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = read_env_string(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(var = name, value = %raw, error = %e, "ignoring invalid environment override");
            None
        }
    }
}
