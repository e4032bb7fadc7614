//! ---
//! narxr_section: "01-core-functionality"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Shared primitives for the broker client runtime."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_servers() -> Vec<String> {
    vec![
        "nats://localhost:4222".to_owned(),
        "nats://nats:4222".to_owned(),
    ]
}

fn default_wait_on_first_connect() -> bool {
    true
}

fn default_view_errors() -> bool {
    true
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_publish_attempts() -> usize {
    1
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Primary configuration object for a broker service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Log transport and pattern failures. Expected failures are still
    /// reported through return values when this is off.
    #[serde(default = "default_view_errors")]
    pub view_errors: bool,
}

/// Metadata describing where a [`ServiceConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedServiceConfig {
    pub config: ServiceConfig,
    pub source: PathBuf,
}

impl ServiceConfig {
    pub const ENV_CONFIG_PATH: &str = "NARXR_CONFIG";

    /// Configuration with a display name and otherwise default values.
    pub fn named(name: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.connection.name = Some(name.into());
        config
    }

    /// Load configuration from disk, respecting the `NARXR_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedServiceConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedServiceConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedServiceConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<ServiceConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Display name used for the connection and the `serverName` header.
    pub fn server_name(&self) -> &str {
        self.connection.name.as_deref().unwrap_or_default()
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        if self.request.timeout.is_zero() {
            return Err(anyhow!("request timeout must be greater than zero"));
        }
        self.retry.publish.validate("publish")?;
        self.retry.respond.validate("respond")?;
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            request: RequestConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
            view_errors: default_view_errors(),
        }
    }
}

impl std::str::FromStr for ServiceConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: ServiceConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Broker endpoints and reconnect behaviour handed to the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// `None` keeps reconnecting forever.
    #[serde(default)]
    pub max_reconnect_attempts: Option<usize>,
    #[serde(default = "default_wait_on_first_connect")]
    pub wait_on_first_connect: bool,
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(anyhow!("connection must list at least one server"));
        }
        if let Some(server) = self.servers.iter().find(|s| s.trim().is_empty()) {
            return Err(anyhow!("connection server entry '{}' is blank", server));
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            name: None,
            max_reconnect_attempts: None,
            wait_on_first_connect: default_wait_on_first_connect(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default = "default_request_timeout", rename = "timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout: default_request_timeout(),
        }
    }
}

/// Per-pattern failure policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryPolicyConfig::fail_fast")]
    pub publish: RetryPolicyConfig,
    #[serde(default = "RetryPolicyConfig::unlimited")]
    pub respond: RetryPolicyConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            publish: RetryPolicyConfig::fail_fast(),
            respond: RetryPolicyConfig::unlimited(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    #[default]
    Fixed,
    Exponential,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicyConfig {
    /// Total attempts including the first one. `0` retries forever.
    #[serde(default = "default_publish_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_retry_delay", rename = "delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub delay: Duration,
    #[serde(default)]
    pub backoff: RetryBackoff,
    #[serde(default = "default_retry_max_delay", rename = "max_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
    #[serde(default, rename = "jitter_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub jitter: Duration,
}

impl RetryPolicyConfig {
    /// Single attempt, failure reported straight to the caller.
    pub fn fail_fast() -> Self {
        Self {
            max_attempts: 1,
            delay: default_retry_delay(),
            backoff: RetryBackoff::Fixed,
            max_delay: default_retry_max_delay(),
            jitter: Duration::ZERO,
        }
    }

    /// Retry forever with a fixed delay between attempts.
    pub fn unlimited() -> Self {
        Self {
            max_attempts: 0,
            ..Self::fail_fast()
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_attempts == 0
    }

    fn validate(&self, pattern: &str) -> Result<()> {
        if self.is_unlimited() && self.delay.is_zero() {
            return Err(anyhow!(
                "retry.{} retries forever and needs a non-zero delay_ms",
                pattern
            ));
        }
        if self.max_delay < self.delay {
            return Err(anyhow!(
                "retry.{} max_delay_ms must not be smaller than delay_ms",
                pattern
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Directory for a daily rolling log file. Stdout only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            directory: None,
            file_prefix: None,
        }
    }
}
