//! Configuration management for the WebSSH daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/webssh/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lower bound of the idle timeout, in minutes.
pub const MIN_IDLE_MINUTES: u64 = 1;

/// Upper bound of the idle timeout, in minutes.
pub const MAX_IDLE_MINUTES: u64 = 20;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_queue_count must be greater than 0")]
    InvalidMaxQueueCount,

    #[error("max_lines_per_fetch must be greater than 0")]
    InvalidMaxLinesPerFetch,

    #[error("max_output_length must be greater than 0")]
    InvalidMaxOutputLength,

    #[error("listener_capacity must be greater than 0")]
    InvalidListenerCapacity,

    #[error("terminal geometry must be non-zero, got {cols}x{rows}")]
    InvalidTerminalSize { cols: u32, rows: u32 },

    #[error("terminal_type must not be empty")]
    InvalidTerminalType,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the WebSSH daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Session pool limits.
    pub pool: PoolConfig,

    /// Geometry of newly opened shell channels.
    pub terminal: TerminalConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Session pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Minutes without input before a session is reclaimed. Clamped to
    /// [1, 20] wherever it is used.
    pub max_idle_minutes: u64,

    /// Capacity of each session's output buffer, in entries.
    pub max_queue_count: usize,

    /// Maximum entries drained by one fetch.
    pub max_lines_per_fetch: usize,

    /// Maximum bytes of text returned by one fetch.
    pub max_output_length: usize,

    /// Channel capacity of each real-time listener.
    pub listener_capacity: usize,
}

/// Initial geometry and type of the interactive shell channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminalConfig {
    /// Terminal type announced to the remote host.
    pub terminal_type: String,

    /// Columns.
    pub cols: u32,

    /// Rows.
    pub rows: u32,

    /// Width in pixels.
    pub width_px: u32,

    /// Height in pixels.
    pub height_px: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_minutes: MAX_IDLE_MINUTES,
            max_queue_count: 10_000,
            max_lines_per_fetch: 1_000,
            max_output_length: 100_000,
            listener_capacity: 256,
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            terminal_type: "xterm".to_string(),
            cols: 80,
            rows: 30,
            width_px: 800,
            height_px: 400,
        }
    }
}

impl PoolConfig {
    /// Returns `max_idle_minutes` clamped to the inclusive range [1, 20].
    pub fn clamped_idle_minutes(&self) -> u64 {
        self.max_idle_minutes.clamp(MIN_IDLE_MINUTES, MAX_IDLE_MINUTES)
    }

    /// Idle expiry and connect timeout, derived from the clamped minutes.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.clamped_idle_minutes() * 60)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webssh")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - WEBSSH_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - WEBSSH_MAX_IDLE_MINUTES: Override the idle timeout
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("WEBSSH_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(minutes) = std::env::var("WEBSSH_MAX_IDLE_MINUTES") {
            match minutes.trim().parse::<u64>() {
                Ok(minutes) => {
                    tracing::info!("Overriding max_idle_minutes from environment: {}", minutes);
                    self.pool.max_idle_minutes = minutes;
                }
                Err(_) if minutes.is_empty() => {}
                Err(e) => {
                    tracing::warn!(value = %minutes, error = %e, "Ignoring invalid WEBSSH_MAX_IDLE_MINUTES");
                }
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// `max_idle_minutes` is never rejected; it is clamped when used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_queue_count == 0 {
            return Err(ConfigError::InvalidMaxQueueCount);
        }

        if self.pool.max_lines_per_fetch == 0 {
            return Err(ConfigError::InvalidMaxLinesPerFetch);
        }

        if self.pool.max_output_length == 0 {
            return Err(ConfigError::InvalidMaxOutputLength);
        }

        if self.pool.listener_capacity == 0 {
            return Err(ConfigError::InvalidListenerCapacity);
        }

        if self.terminal.cols == 0 || self.terminal.rows == 0 {
            return Err(ConfigError::InvalidTerminalSize {
                cols: self.terminal.cols,
                rows: self.terminal.rows,
            });
        }

        if self.terminal.terminal_type.trim().is_empty() {
            return Err(ConfigError::InvalidTerminalType);
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
