use serde::Deserialize;

use crate::error::RelayResult;

/// Root configuration. Loaded from an optional config file and from
/// environment variables with the prefix `TAGRELAY__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Retries allowed per task after the first attempt.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Period of the background drain that picks up tasks left queued while
    /// the delivery channel was offline.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_ready_channel_capacity")]
    pub ready_channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub ignore_unmapped_properties: bool,
}

fn default_max_attempts() -> u32 {
    2
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_ready_channel_capacity() -> usize {
    1024
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            ready_channel_capacity: default_ready_channel_capacity(),
        }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            ignore_unmapped_properties: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryConfig::default(),
            mapping: MappingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables only.
    pub fn load() -> RelayResult<Self> {
        Self::load_from(None)
    }

    /// Load configuration from an optional file (TOML/JSON/YAML, detected by
    /// extension) overlaid with environment variables.
    pub fn load_from(path: Option<&str>) -> RelayResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("TAGRELAY")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}
