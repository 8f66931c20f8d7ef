//! Layered configuration: defaults, optional TOML file, CADENZA_* env vars.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConverterConfig {
    /// Move failure messages and stack traces into codec-encoded payloads.
    #[serde(default)]
    pub encode_common_attributes: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: default_queue(),
            max_retries: default_max_retries(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_result_poll_interval_ms")]
    pub result_poll_interval_ms: u64,
    #[serde(default = "default_result_poll_attempts")]
    pub result_poll_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            result_poll_interval_ms: default_result_poll_interval_ms(),
            result_poll_attempts: default_result_poll_attempts(),
        }
    }
}

fn default_queue() -> String {
    "default".to_string()
}

fn default_max_retries() -> i32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_result_poll_interval_ms() -> u64 {
    10
}

fn default_result_poll_attempts() -> u32 {
    1000
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder { config_path: None }
    }
}

pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
}

impl ConfigBuilder {
    /// Set the config file path (overrides default search).
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn build(self) -> Result<Config> {
        let mut builder = config::Config::builder();

        builder = match &self.config_path {
            Some(path) => builder.add_source(config::File::from(path.clone())),
            None => builder.add_source(config::File::with_name("cadenza").required(false)),
        };

        builder = builder.add_source(
            config::Environment::with_prefix("CADENZA")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        config
            .try_deserialize()
            .context("Failed to parse configuration")
    }
}
