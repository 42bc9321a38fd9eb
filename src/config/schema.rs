//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use super::error::{ConfigError, ConfigResult};
use crate::link::LinkSettings;
use crate::session::SessionSettings;
use crate::supervisor::SupervisorSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The shared downstream device
    pub shared: SharedConfig,
    /// The upstream controller devices
    pub controllers: ControllersConfig,
    /// Serial parameters applied to every link
    pub link: LinkConfig,
    /// Slot arbitration
    pub arbiter: ArbiterConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check the configuration is complete and consistent.
    pub fn validate(&self) -> ConfigResult<()> {
        let shared = self.shared_device()?;

        if self.controllers.devices.is_empty() {
            return Err(ConfigError::Missing(
                "at least one controller device".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        seen.insert(shared);
        for device in &self.controllers.devices {
            if device.trim().is_empty() {
                return Err(ConfigError::invalid("controllers.devices", "empty device name"));
            }
            if !seen.insert(device.as_str()) {
                return Err(ConfigError::invalid(
                    "controllers.devices",
                    format!("device '{device}' is listed more than once"),
                ));
            }
        }

        let link = &self.link;
        for (key, value) in [
            ("link.baud_rate", u64::from(link.baud_rate)),
            ("link.rx_buffer_size", link.rx_buffer_size as u64),
            ("link.tx_buffer_size", link.tx_buffer_size as u64),
            ("link.read_timeout_ms", link.read_timeout_ms),
            ("link.poll_interval_ms", link.poll_interval_ms),
            ("arbiter.backoff_ms", self.arbiter.backoff_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(key, "must be greater than zero"));
            }
        }
        if link.reply_timeout_ms == Some(0) {
            return Err(ConfigError::invalid(
                "link.reply_timeout_ms",
                "must be greater than zero",
            ));
        }
        if link.line_ending.is_empty() {
            return Err(ConfigError::invalid("link.line_ending", "must not be empty"));
        }

        Ok(())
    }

    /// The shared device name, which has no default.
    pub fn shared_device(&self) -> ConfigResult<&str> {
        match self.shared.device.as_deref() {
            Some(device) if !device.trim().is_empty() => Ok(device),
            _ => Err(ConfigError::Missing("shared.device".to_string())),
        }
    }

    /// Parameters for opening every link.
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            baud_rate: self.link.baud_rate,
            rx_buffer_size: self.link.rx_buffer_size,
            tx_buffer_size: self.link.tx_buffer_size,
            line_ending: self.link.line_ending.clone(),
        }
    }

    /// Timing for the supervisor and its sessions.
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            session: SessionSettings {
                request_timeout: self.link.read_timeout(),
                reply_timeout: self.link.reply_timeout(),
                backoff: self.arbiter.backoff(),
                poll_interval: self.link.poll_interval(),
            },
            handoff_window: self.arbiter.handoff_window(),
            stop_on_shared_fault: self.arbiter.stop_on_shared_fault,
        }
    }
}

/// Shared device section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedConfig {
    /// Device path, e.g. "/dev/ttyUSB0" or "COM1"
    pub device: Option<String>,
}

/// Controller devices section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllersConfig {
    /// Device paths, in controller id order
    pub devices: Vec<String>,
}

/// Serial link section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub baud_rate: u32,
    /// Longest accepted line
    pub rx_buffer_size: usize,
    /// Capacity hint for assembling outgoing lines
    pub tx_buffer_size: usize,
    /// How long a slot holder waits for its controller's request
    pub read_timeout_ms: u64,
    /// How long to wait for the shared device's reply; defaults to `read_timeout_ms`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_timeout_ms: Option<u64>,
    /// Appended to every forwarded line
    pub line_ending: String,
    /// Longest single blocking read
    pub poll_interval_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let settings = LinkSettings::default();
        Self {
            baud_rate: settings.baud_rate,
            rx_buffer_size: settings.rx_buffer_size,
            tx_buffer_size: settings.tx_buffer_size,
            read_timeout_ms: 1000,
            reply_timeout_ms: None,
            line_ending: settings.line_ending,
            poll_interval_ms: 50,
        }
    }
}

impl LinkConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms.unwrap_or(self.read_timeout_ms))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Arbitration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Pause after a refused acquisition
    pub backoff_ms: u64,
    /// Yield period after a contended release; defaults to twice the backoff, 0 disables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_window_ms: Option<u64>,
    /// Stop everything when the shared device faults
    pub stop_on_shared_fault: bool,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            backoff_ms: 100,
            handoff_window_ms: None,
            stop_on_shared_fault: true,
        }
    }
}

impl ArbiterConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn handoff_window(&self) -> Duration {
        self.handoff_window_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.backoff() * 2)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}
