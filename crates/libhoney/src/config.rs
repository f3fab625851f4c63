// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::Error;
use std::env;
use std::time::Duration;

pub const DEFAULT_API_HOST: &str = "https://api.honeycomb.io";

/// Tuning for the transmission engine
#[derive(Debug, Clone, PartialEq)]
pub struct TransmissionConfig {
    /// Maximum number of batches being sent at the same time
    pub max_concurrent_batches: usize,
    /// Number of events that triggers a flush of the accumulator
    pub max_batch_size: usize,
    /// Maximum time an event waits in the accumulator before being flushed
    pub send_frequency: Duration,
    /// Wait for space in the pending queue instead of dropping the event
    pub block_on_send: bool,
    /// Wait for space in the response queue instead of dropping the response
    pub block_on_response: bool,
    /// Capacity of the pending queue
    pub pending_queue_size: usize,
    /// Capacity of the response queue
    pub response_queue_size: usize,
    /// Appended to the User-Agent header after a space
    pub user_agent_addition: Option<String>,
    /// Gzip request bodies
    pub gzip: bool,
    /// Gzip level, 0 to 9
    pub compression_level: u32,
    /// Timeout of a single batch request
    pub timeout: Duration,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Bound on each of the two waits performed by close
    pub close_timeout: Duration,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: 10,
            max_batch_size: 100,
            send_frequency: Duration::from_millis(250),
            block_on_send: false,
            block_on_response: false,
            pending_queue_size: 1000,
            response_queue_size: 2000,
            user_agent_addition: None,
            gzip: true,
            compression_level: 6,
            timeout: Duration::from_secs(10),
            https_proxy: None,
            close_timeout: Duration::from_secs(10),
        }
    }
}

impl TransmissionConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, Error> {
        let defaults = Self::default();
        let config = Self {
            max_concurrent_batches: parse_env("HONEYCOMB_MAX_CONCURRENT_BATCHES")
                .unwrap_or(defaults.max_concurrent_batches),
            max_batch_size: parse_env("HONEYCOMB_MAX_BATCH_SIZE")
                .unwrap_or(defaults.max_batch_size),
            send_frequency: parse_env("HONEYCOMB_SEND_FREQUENCY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.send_frequency),
            block_on_send: env_flag("HONEYCOMB_BLOCK_ON_SEND").unwrap_or(defaults.block_on_send),
            block_on_response: env_flag("HONEYCOMB_BLOCK_ON_RESPONSE")
                .unwrap_or(defaults.block_on_response),
            pending_queue_size: parse_env("HONEYCOMB_PENDING_QUEUE_SIZE")
                .unwrap_or(defaults.pending_queue_size),
            response_queue_size: parse_env("HONEYCOMB_RESPONSE_QUEUE_SIZE")
                .unwrap_or(defaults.response_queue_size),
            user_agent_addition: env::var("HONEYCOMB_USER_AGENT_ADDITION").ok(),
            gzip: env_flag("HONEYCOMB_GZIP").unwrap_or(defaults.gzip),
            compression_level: parse_env("HONEYCOMB_COMPRESSION_LEVEL")
                .unwrap_or(defaults.compression_level),
            timeout: parse_env("HONEYCOMB_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            https_proxy: env::var("HONEYCOMB_PROXY_HTTPS")
                .or_else(|_| env::var("HTTPS_PROXY"))
                .ok(),
            close_timeout: defaults.close_timeout,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_concurrent_batches == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_batches must be greater than 0".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "max_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.send_frequency.is_zero() {
            return Err(Error::InvalidConfig(
                "send_frequency must be greater than 0".to_string(),
            ));
        }
        // tokio channels panic on a zero capacity
        if self.pending_queue_size == 0 || self.response_queue_size == 0 {
            return Err(Error::InvalidConfig(
                "queue sizes must be greater than 0".to_string(),
            ));
        }
        if self.compression_level > 9 {
            return Err(Error::InvalidConfig(format!(
                "Invalid compression level {}. Must be between 0 and 9",
                self.compression_level
            )));
        }
        Ok(())
    }
}

/// Configuration for a `Client`
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Team write key sent as X-Honeycomb-Team
    pub writekey: String,
    /// Default dataset for events created from the client
    pub dataset: String,
    /// Base URL of the ingestion API
    pub api_host: String,
    /// Keep one event out of `sample_rate`
    pub sample_rate: u32,
    pub transmission: TransmissionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            writekey: String::new(),
            dataset: String::new(),
            api_host: DEFAULT_API_HOST.to_string(),
            sample_rate: 1,
            transmission: TransmissionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, Error> {
        let writekey = env::var("HONEYCOMB_WRITEKEY").unwrap_or_default();
        let dataset = env::var("HONEYCOMB_DATASET").unwrap_or_default();
        let api_host =
            env::var("HONEYCOMB_API_HOST").unwrap_or_else(|_| DEFAULT_API_HOST.to_string());
        let sample_rate = parse_env("HONEYCOMB_SAMPLE_RATE").unwrap_or(1);
        let transmission = TransmissionConfig::from_env()?;

        let config = Self {
            writekey,
            dataset,
            api_host,
            sample_rate,
            transmission,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Empty writekey and dataset are accepted here: they can still be set on
    /// builders and events, and are checked when an event is sent.
    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidConfig(
                "sample_rate must be at least 1".to_string(),
            ));
        }
        if !self.api_host.is_empty() && reqwest::Url::parse(&self.api_host).is_err() {
            return Err(Error::InvalidConfig(format!(
                "Invalid api_host '{}'",
                self.api_host
            )));
        }
        self.transmission.validate()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse::<T>().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|val| matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
}
