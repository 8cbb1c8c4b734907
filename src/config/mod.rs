//! Configuration Module
//!
//! TOML configuration for meteo-relay with support for:
//! - The upstream source broker
//! - Any number of downstream sink brokers with their channel maps
//! - `${VAR}` / `${VAR:-default}` substitution inside the document
//! - Environment variable overrides (METEO_RELAY__* prefix)
//!
//! When no configuration file exists a built-in document is used that
//! describes one public source broker and three sinks, all addressable
//! through `SOURCE_*` and `SINK_{1,2,3}_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use tracing::info;

pub use sink::{SinkConfig, DEFAULT_BASE_TOPIC};
pub use source::SourceConfig;

mod sink;
mod source;


/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "METEO_RELAY_CONFIG";

/// Configuration file used when `METEO_RELAY_CONFIG` is not set
pub const DEFAULT_CONFIG_PATH: &str = "meteo-relay.toml";

/// Prefix for `METEO_RELAY__SECTION__KEY` overrides
const ENV_PREFIX: &str = "METEO_RELAY";

/// Document used when no configuration file exists
pub const DEFAULT_CONFIG: &str = r#"
[log]
level = "info"

[source]
host = "${SOURCE_HOST:-broker.hivemq.com}"
port = ${SOURCE_PORT:-1883}
keepalive = 60
topic_prefix = "meteo"

[[sink]]
id = "client_1"
host = "${SINK_1_HOST:-your-cedalo-instance-1.cedalo.com}"
port = ${SINK_1_PORT:-1883}
username = "${SINK_1_USERNAME:-}"
password = "${SINK_1_PASSWORD:-}"
client_id = "meteo_bridge_1"
base_topic = "weather_station/central/"

[sink.channels]
temperature = "ambient_temperature"
humidity = "relative_humidity"
pressure = "atmospheric_pressure"
wind = "wind_speed"
rainfall = "precipitation"

[[sink]]
id = "client_2"
host = "${SINK_2_HOST:-your-cedalo-instance-2.cedalo.com}"
port = ${SINK_2_PORT:-1883}
username = "${SINK_2_USERNAME:-}"
password = "${SINK_2_PASSWORD:-}"
client_id = "meteo_bridge_2"
base_topic = "environmental_sensors/city/"

[sink.channels]
temperature = "temp_celsius"
humidity = "humidity_percent"
pressure = "pressure_hpa"
wind = "wind_velocity"
rainfall = "rain_mm"

[[sink]]
id = "client_3"
host = "${SINK_3_HOST:-your-cedalo-instance-3.cedalo.com}"
port = ${SINK_3_PORT:-1883}
username = "${SINK_3_USERNAME:-}"
password = "${SINK_3_PASSWORD:-}"
client_id = "meteo_bridge_3"
base_topic = "iot_meteo/aggregated/"

[sink.channels]
temperature = "thermal_reading"
humidity = "moisture_level"
pressure = "barometric_data"
wind = "air_flow"
rainfall = "hydrometer"
"#;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax. Empty variables count as
/// unset.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(format!("substitution pattern: {}", e)))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name)
                .ok()
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        })
        .to_string())
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Upstream broker
    pub source: SourceConfig,
    /// Downstream brokers, in fan-out order
    pub sink: Vec<SinkConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level or filter directive: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file falls back to [`DEFAULT_CONFIG`]. Supports two forms of
    /// environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax
    /// 2. Override via env vars: `METEO_RELAY__` prefix with double
    ///    underscores for nesting:
    ///    - `METEO_RELAY__LOG__LEVEL=debug` overrides `log.level`
    ///    - `METEO_RELAY__SOURCE__KEEPALIVE=30` overrides `source.keepalive`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DEFAULT_CONFIG.to_string(),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Self::build(&content)
    }

    /// Load from the file named by `METEO_RELAY_CONFIG`, or
    /// `meteo-relay.toml` in the working directory.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Self::path_from_env())
    }

    /// Path [`Config::from_env`] reads
    pub fn path_from_env() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn build(content: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(content)?;

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = config::Config::builder()
            .set_default("log.level", "info")?
            .add_source(File::from_str(&substituted, FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.qos > 1 {
            return Err(ConfigError::Validation(
                "source qos must be 0 or 1".to_string(),
            ));
        }
        validate_timing(
            "source",
            self.source.connect_timeout,
            self.source.reconnect_interval,
            self.source.max_reconnect_interval,
        )?;

        let mut seen = std::collections::HashSet::new();
        for sink in &self.sink {
            if sink.id.is_empty() {
                return Err(ConfigError::Validation(
                    "sink id must not be empty".to_string(),
                ));
            }
            if !seen.insert(sink.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate sink id '{}'",
                    sink.id
                )));
            }
            if sink.qos > 1 {
                return Err(ConfigError::Validation(format!(
                    "sink '{}': qos must be 0 or 1",
                    sink.id
                )));
            }
            if sink.queue_capacity == 0 {
                return Err(ConfigError::Validation(format!(
                    "sink '{}': queue_capacity must be greater than 0",
                    sink.id
                )));
            }
            if sink.enabled && (sink.host.is_empty() || sink.port == 0) {
                return Err(ConfigError::Validation(format!(
                    "sink '{}': host and port are required",
                    sink.id
                )));
            }
            validate_timing(
                &format!("sink '{}'", sink.id),
                sink.connect_timeout,
                sink.reconnect_interval,
                sink.max_reconnect_interval,
            )?;
        }

        Ok(())
    }

    /// Log the effective configuration with credentials masked
    pub fn log_summary(&self) {
        info!(
            "Source: {}:{} ({}, client_id={}, prefix={}, user={})",
            self.source.host,
            self.source.port,
            self.source.protocol,
            self.source.client_id(),
            self.source.topic_prefix,
            mask_credentials(self.source.username.as_deref(), self.source.password.as_deref()),
        );
        for sink in &self.sink {
            info!(
                "Sink '{}': {}:{} ({}, client_id={}, base_topic={}, channels={}, user={}{})",
                sink.id,
                sink.host,
                sink.port,
                sink.protocol,
                sink.client_id(),
                sink.base_topic,
                sink.channels.len(),
                mask_credentials(sink.username.as_deref(), sink.password.as_deref()),
                if sink.enabled { "" } else { ", disabled" },
            );
        }
    }
}

/// Non-zero timeouts and `reconnect_interval <= max_reconnect_interval`
fn validate_timing(
    label: &str,
    connect_timeout: Duration,
    reconnect_interval: Duration,
    max_reconnect_interval: Duration,
) -> Result<(), ConfigError> {
    if connect_timeout.is_zero() {
        return Err(ConfigError::Validation(format!(
            "{}: connect_timeout must be greater than 0",
            label
        )));
    }
    if reconnect_interval.is_zero() {
        return Err(ConfigError::Validation(format!(
            "{}: reconnect_interval must be greater than 0",
            label
        )));
    }
    if reconnect_interval > max_reconnect_interval {
        return Err(ConfigError::Validation(format!(
            "{}: reconnect_interval must not exceed max_reconnect_interval",
            label
        )));
    }
    Ok(())
}

/// `user:****`, or `-` when no username is configured
pub(crate) fn mask_credentials(username: Option<&str>, password: Option<&str>) -> String {
    match username.filter(|u| !u.is_empty()) {
        None => "-".to_string(),
        Some(user) if password.is_some_and(|p| !p.is_empty()) => format!("{}:****", user),
        Some(user) => user.to_string(),
    }
}
