pub mod log_level;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Deserializer};
use serde_aux::field_attributes::{
    deserialize_bool_from_anything, deserialize_number_from_string,
};
use serde_json::Value;
use tracing::debug;

use crate::config::log_level::LogLevel;
use crate::{CONFIG_FILE_NAME, ENV_PREFIX};

/// Process-wide tracker configuration.
///
/// A `TrackerConfig` is always handled as a whole: it is loaded once at
/// startup and later overrides replace the entire value, so the service
/// never observes a partially updated configuration.
#[derive(Debug, PartialEq, Eq, Deserialize, Clone)]
#[serde(default)]
pub struct TrackerConfig {
    /// Collector endpoint receiving `POST`ed batches.
    pub endpoint: String,
    pub api_key: Option<String>,
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub enabled: bool,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub flush_interval_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_buffer_size: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_batch_size: usize,
    /// How many times a failed event is requeued before it is dropped.
    /// Zero means failed events are never retried.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_retries: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_backoff_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub request_timeout_ms: u64,
    pub https_proxy: Option<String>,
    /// Properties merged into every event, e.g. `app:memorial,env:prod`.
    #[serde(deserialize_with = "deserialize_global_properties")]
    pub global_properties: BTreeMap<String, String>,
    pub log_level: LogLevel,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            endpoint: String::default(),
            api_key: None,
            enabled: true,
            // Flushing
            flush_interval_ms: 30_000,
            max_buffer_size: 1_000,
            max_batch_size: 50,
            max_retries: 3,
            max_backoff_ms: 300_000,
            // Transport
            request_timeout_ms: 5_000,
            https_proxy: None,
            // Enrichment
            global_properties: BTreeMap::new(),
            log_level: LogLevel::default(),
        }
    }
}

impl TrackerConfig {
    /// Default configuration pointed at `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        TrackerConfig {
            endpoint: endpoint.into(),
            ..TrackerConfig::default()
        }
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Checks the invariants the tracker relies on and clamps
    /// `max_batch_size` to `max_buffer_size`.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint must be set".to_string()));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "flush_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_buffer_size == 0 || self.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "max_buffer_size and max_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_batch_size > self.max_buffer_size {
            debug!(
                "CONFIG | max_batch_size {} exceeds max_buffer_size {}, clamping",
                self.max_batch_size, self.max_buffer_size
            );
            self.max_batch_size = self.max_buffer_size;
        }
        if self.max_backoff_ms < self.flush_interval_ms {
            self.max_backoff_ms = self.flush_interval_ms;
        }
        Ok(self)
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse tracker config: {0}")]
    ParseError(String),
    #[error("invalid tracker config: {0}")]
    Invalid(String),
}

/// Loads the configuration from `<config_directory>/tracker.yaml`, then from
/// `TRACKER_`-prefixed environment variables, which take precedence.
pub fn get_config(config_directory: &Path) -> Result<TrackerConfig, ConfigError> {
    let path = config_directory.join(CONFIG_FILE_NAME);

    let figment = Figment::new()
        .merge(Yaml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX))
        .merge(Env::raw().only(&["HTTPS_PROXY"]));

    let mut config: TrackerConfig = figment
        .extract()
        .map_err(|err| ConfigError::ParseError(err.to_string()))?;

    // TRACKER_HTTPS_PROXY wins over HTTPS_PROXY
    if let Ok(https_proxy) = std::env::var("TRACKER_HTTPS_PROXY") {
        config.https_proxy = Some(https_proxy);
    }

    config.validate()
}

fn deserialize_global_properties<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(parse_key_value_list(&s)),
        Value::Object(map) => Ok(map
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k, s)),
                Value::Number(n) => Some((k, n.to_string())),
                Value::Bool(b) => Some((k, b.to_string())),
                _ => {
                    debug!("CONFIG | ignoring non scalar global property {k}");
                    None
                }
            })
            .collect()),
        Value::Null => Ok(BTreeMap::new()),
        _ => Err(serde::de::Error::custom(
            "expected a `key:value` list or a mapping",
        )),
    }
}

/// Parses `key:value` pairs separated by commas or spaces.
fn parse_key_value_list(raw: &str) -> BTreeMap<String, String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| match pair.split_once(':') {
            Some((key, value)) if !key.is_empty() => {
                Some((key.to_string(), value.to_string()))
            }
            _ => {
                debug!("CONFIG | ignoring malformed global property {pair}");
                None
            }
        })
        .collect()
}
