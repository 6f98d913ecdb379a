use crate::error::{GatewayError, GatewayResult};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Lower bound for both the admission window and the batch retention period.
pub const MIN_WINDOW_MS: u64 = 500;
/// Upper bound for both the admission window and the batch retention period.
pub const MAX_WINDOW_MS: u64 = 60_000;
pub const MAX_IMMEDIATE_CALLS: u32 = 256;
pub const MAX_SEPARATOR_CHARS: usize = 256;
pub const MAX_BATCHED_ITEMS: usize = 1000;

/// Root application configuration. Loaded from environment variables
/// with the prefix `NOTIFY_GATEWAY__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub batching: BatchConfig,
    #[serde(default)]
    pub sender: SenderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Rolling-window admission settings.
///
/// `max_immediate_calls` requests may bypass batching per
/// `immediate_window_ms`; everything beyond that is folded into a batch.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_immediate_window_ms")]
    pub immediate_window_ms: u64,
    #[serde(default = "default_max_immediate_calls")]
    pub max_immediate_calls: u32,
}

/// Batch window settings. `max_batched_items = 0` disables truncation.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_retention_period_ms")]
    pub retention_period_ms: u64,
    #[serde(default = "default_item_separator")]
    pub item_separator: String,
    #[serde(default = "default_max_batched_items")]
    pub max_batched_items: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SenderConfig {
    #[serde(default)]
    pub kind: SenderKind,
}

/// Delivery mechanism used by the gateway binary.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    /// Write notifications to stdout.
    #[default]
    Console,
    /// Emit notifications as structured log events.
    Log,
}

// Default functions
fn default_node_id() -> String {
    "gateway-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_immediate_window_ms() -> u64 {
    1000
}
fn default_max_immediate_calls() -> u32 {
    1
}
fn default_retention_period_ms() -> u64 {
    5000
}
fn default_item_separator() -> String {
    "\n---\n".to_string()
}
fn default_max_batched_items() -> usize {
    100
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            admission: AdmissionConfig::default(),
            batching: BatchConfig::default(),
            sender: SenderConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            immediate_window_ms: default_immediate_window_ms(),
            max_immediate_calls: default_max_immediate_calls(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            retention_period_ms: default_retention_period_ms(),
            item_separator: default_item_separator(),
            max_batched_items: default_max_batched_items(),
        }
    }
}

impl AdmissionConfig {
    pub fn immediate_window(&self) -> Duration {
        Duration::from_millis(self.immediate_window_ms)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        check_window("admission.immediate_window_ms", self.immediate_window_ms)?;
        if !(1..=MAX_IMMEDIATE_CALLS).contains(&self.max_immediate_calls) {
            return Err(GatewayError::Config(format!(
                "admission.max_immediate_calls must be between 1 and {}, got {}",
                MAX_IMMEDIATE_CALLS, self.max_immediate_calls
            )));
        }
        Ok(())
    }
}

impl BatchConfig {
    pub fn retention_period(&self) -> Duration {
        Duration::from_millis(self.retention_period_ms)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        check_window("batching.retention_period_ms", self.retention_period_ms)?;
        let separator_len = self.item_separator.chars().count();
        if separator_len > MAX_SEPARATOR_CHARS {
            return Err(GatewayError::Config(format!(
                "batching.item_separator must be at most {} characters, got {}",
                MAX_SEPARATOR_CHARS, separator_len
            )));
        }
        if self.max_batched_items > MAX_BATCHED_ITEMS {
            return Err(GatewayError::Config(format!(
                "batching.max_batched_items must be between 0 and {}, got {}",
                MAX_BATCHED_ITEMS, self.max_batched_items
            )));
        }
        Ok(())
    }
}

fn check_window(field: &str, value_ms: u64) -> GatewayResult<()> {
    if (MIN_WINDOW_MS..=MAX_WINDOW_MS).contains(&value_ms) {
        Ok(())
    } else {
        Err(GatewayError::Config(format!(
            "{} must be between {} and {} ms, got {}",
            field, MIN_WINDOW_MS, MAX_WINDOW_MS, value_ms
        )))
    }
}

impl AppConfig {
    /// Load configuration from environment variables only.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from an optional TOML file, overridden by
    /// `NOTIFY_GATEWAY__*` environment variables.
    pub fn load_from(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("NOTIFY_GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        config.try_deserialize()
    }

    /// Check every bound the engine relies on. The engine refuses to start
    /// with a configuration that fails here.
    pub fn validate(&self) -> GatewayResult<()> {
        self.admission.validate()?;
        self.batching.validate()?;
        Ok(())
    }
}
