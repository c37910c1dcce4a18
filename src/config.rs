//! Host configuration loaded from JSON

use crate::endpoint::EndpointSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Delay between a fault and the rebuild of the faulted instance.
pub const RECOVERY_COOLDOWN: Duration = Duration::from_secs(10);

/// Default upper bound on waiting for instances to confirm closure.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn default_name() -> String {
    "endpoint-host".to_string()
}

fn default_cooldown_ms() -> u64 {
    RECOVERY_COOLDOWN.as_millis() as u64
}

fn default_shutdown_timeout_ms() -> Option<u64> {
    Some(SHUTDOWN_TIMEOUT.as_millis() as u64)
}

/// Describes a whole host: timing, queue storage and the endpoints to run.
///
/// ```
/// use endpoint_host::HostConfig;
///
/// let config = HostConfig::from_json_str(r#"{
///     "name": "billing",
///     "shutdown_timeout_ms": null,
///     "endpoints": [
///         { "name": "invoices",
///           "bindings": [{ "transport": "durable_queue",
///                          "address": "net.msmq://localhost/private/invoices" }] }
///     ]
/// }"#).unwrap();
///
/// assert_eq!(config.recovery_cooldown().as_secs(), 10);
/// assert!(config.shutdown_timeout().is_none());
/// assert!(config.endpoints[0].requires_provisioning());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Supervisor name used in logs
    #[serde(default = "default_name")]
    pub name: String,
    /// Cooldown before a faulted instance is rebuilt, in milliseconds
    #[serde(default = "default_cooldown_ms")]
    pub recovery_cooldown_ms: u64,
    /// Bound on the shutdown wait in milliseconds; `null` waits forever
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: Option<u64>,
    /// Root directory for durable queues; in-memory queues when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_root: Option<PathBuf>,
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`, `critical`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Endpoints to host, in start order
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            recovery_cooldown_ms: default_cooldown_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            queue_root: None,
            log_level: None,
            endpoints: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Parses a configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Recovery cooldown as a duration.
    pub fn recovery_cooldown(&self) -> Duration {
        Duration::from_millis(self.recovery_cooldown_ms)
    }

    /// Shutdown bound as a duration, `None` when unbounded.
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_ms.map(Duration::from_millis)
    }

    /// Parsed log level, `Info` when unset.
    pub fn log_level(&self) -> Result<slog::Level, ConfigError> {
        match &self.log_level {
            None => Ok(slog::Level::Info),
            Some(level) => {
                slog::Level::from_str(level).map_err(|()| ConfigError::LogLevel(level.clone()))
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.log_level()?;
        let mut seen = std::collections::HashSet::new();
        for spec in &self.endpoints {
            if spec.name().is_empty() {
                return Err(ConfigError::Invalid("endpoint name must not be empty".into()));
            }
            if !seen.insert(spec.name()) {
                return Err(ConfigError::Invalid(format!(
                    "endpoint '{}' is listed more than once",
                    spec.name()
                )));
            }
        }
        Ok(())
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {path}: {source}", path = path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid JSON for a host configuration
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// Unknown log level name
    #[error("unknown log level '{0}'")]
    LogLevel(String),
    /// The document parsed but describes an impossible host
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
