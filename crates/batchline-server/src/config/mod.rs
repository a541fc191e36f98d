//! Bridge configuration.
//!
//! This module provides configuration management for the query bridge and
//! the `batchlined` daemon.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use batchline_chunk::{EncoderOptions, UnsupportedColumnPolicy};
use batchline_common::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_CHANNEL_CAPACITY, DEFAULT_QUERY_TIMEOUT_SECS,
};

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Rows per engine batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Engine partition count (defaults to the engine's own choice).
    #[serde(default)]
    pub target_partitions: Option<usize>,

    /// Statement and pull timeout in seconds (0 disables).
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Capacity of the request and response channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Byte budget for chunks the daemon holds at once.
    #[serde(default)]
    pub chunk_budget_bytes: Option<usize>,

    /// Log SQL text of submitted statements.
    #[serde(default)]
    pub query_logging: bool,

    /// Chunk encoder type mapping.
    #[serde(default)]
    pub encoder: EncoderOptions,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_query_timeout() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            target_partitions: None,
            query_timeout_secs: default_query_timeout(),
            channel_capacity: default_channel_capacity(),
            chunk_budget_bytes: None,
            query_logging: false,
            encoder: EncoderOptions::default(),
        }
    }
}

impl BridgeConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Converts configuration to TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Returns the query timeout, or `None` when disabled.
    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_secs > 0).then(|| Duration::from_secs(self.query_timeout_secs))
    }

    /// Creates a builder for configuration.
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::new()
    }
}

/// Builder for bridge configuration.
#[derive(Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets rows per engine batch.
    pub fn batch_size(mut self, rows: usize) -> Self {
        self.config.batch_size = rows;
        self
    }

    /// Sets the engine partition count.
    pub fn target_partitions(mut self, partitions: usize) -> Self {
        self.config.target_partitions = Some(partitions);
        self
    }

    /// Sets the query timeout in seconds.
    pub fn query_timeout_secs(mut self, secs: u64) -> Self {
        self.config.query_timeout_secs = secs;
        self
    }

    /// Sets the channel capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Sets the chunk byte budget.
    pub fn chunk_budget_bytes(mut self, bytes: usize) -> Self {
        self.config.chunk_budget_bytes = Some(bytes);
        self
    }

    /// Enables SQL logging.
    pub fn query_logging(mut self, enabled: bool) -> Self {
        self.config.query_logging = enabled;
        self
    }

    /// Sets the encoder options.
    pub fn encoder(mut self, options: EncoderOptions) -> Self {
        self.config.encoder = options;
        self
    }

    /// Sets the unsupported-column policy.
    pub fn unsupported_columns(mut self, policy: UnsupportedColumnPolicy) -> Self {
        self.config.encoder.unsupported_columns = policy;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}
