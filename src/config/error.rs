//! Configuration error types for the config module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading, validating or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly named config file does not exist
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Reading or writing a config file failed
    #[error("failed to {action} configuration file '{}': {source}", path.display())]
    File {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema
    #[error("invalid configuration in '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The effective configuration could not be rendered back to TOML
    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    /// A value is out of range or inconsistent with another
    #[error("invalid value for '{key}': {message}")]
    Invalid { key: String, message: String },

    /// An environment override could not be parsed
    #[error("environment variable {var}: {message}")]
    Env { var: String, message: String },

    /// A setting with no default was not given anywhere
    #[error("missing required setting: {0}")]
    Missing(String),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn env(var: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            message: message.into(),
        }
    }

    pub(crate) fn file(
        action: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::File {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
