// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BATCH_CAPACITY, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SINK_DIR, DEFAULT_SINK_TIMEOUT,
};
use crate::errors::ConfigError;
use crate::listener::SyslogListenerConfig;
use crate::sink::SinkKind;

/// Configuration for the syslog ingestion server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the UDP socket binds to
    pub host: String,
    /// UDP port
    pub port: u16,
    /// Records per batch before rotation
    pub batch_capacity: usize,
    /// Where rotated batches go
    pub sink: SinkKind,
    /// Output directory for the jsonl sink
    pub sink_dir: PathBuf,
    /// Upper bound on a single sink write
    pub sink_timeout: Duration,
    /// Hand the partial batch to the sink on shutdown instead of dropping it
    pub flush_on_shutdown: bool,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            sink: SinkKind::Discard,
            sink_dir: PathBuf::from(DEFAULT_SINK_DIR),
            sink_timeout: DEFAULT_SINK_TIMEOUT,
            flush_on_shutdown: false,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Numbers that fail to
    /// parse fall back to their defaults; values that parse but are out of
    /// range are rejected by [`ServerConfig::validate`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("SYSLOG_HOST").unwrap_or(defaults.host);
        let port = lookup("SYSLOG_PORT")
            .and_then(|port| port.trim().parse::<u16>().ok())
            .unwrap_or(defaults.port);
        let batch_capacity = lookup("SYSLOG_BATCH_CAPACITY")
            .and_then(|capacity| capacity.trim().parse::<usize>().ok())
            .unwrap_or(defaults.batch_capacity);
        let sink = match lookup("SYSLOG_SINK") {
            Some(kind) => kind.parse::<SinkKind>()?,
            None => defaults.sink,
        };
        let sink_dir = lookup("SYSLOG_SINK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.sink_dir);
        let sink_timeout = lookup("SYSLOG_SINK_TIMEOUT_SECS")
            .and_then(|secs| secs.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.sink_timeout);
        let flush_on_shutdown = lookup("SYSLOG_FLUSH_ON_SHUTDOWN")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(defaults.flush_on_shutdown);
        let log_level = lookup("SYSLOG_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            host,
            port,
            batch_capacity,
            sink,
            sink_dir,
            sink_timeout,
            flush_on_shutdown,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "SYSLOG_HOST cannot be empty".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(ConfigError::Invalid(
                "Port must be greater than 0".to_string(),
            ));
        }

        if self.batch_capacity == 0 {
            return Err(ConfigError::Invalid(
                "Batch capacity must be at least 1".to_string(),
            ));
        }

        if self.sink_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "Sink timeout must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn listener_config(&self) -> SyslogListenerConfig {
        SyslogListenerConfig {
            host: self.host.clone(),
            port: self.port,
        }
    }
}
