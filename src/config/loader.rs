//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_SHARER";

/// Config file name
const CONFIG_FILE_NAME: &str = "serial-sharer.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_SHARER_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_SHARER_CONFIG` environment variable (explicit path)
    /// 2. `./serial-sharer.toml` (current directory)
    /// 3. `serial-sharer.toml` in the platform config directory
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override values from the file.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };

        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file), still honoring
    /// environment overrides.
    pub fn with_defaults() -> ConfigResult<Self> {
        let mut config = Config::default();
        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path: None,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. Platform config directory
    get_default_config_path().filter(|path| path.exists())
}

/// Get the platform config directory for this application.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "serial-sharer").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::file("read", path, e)
        }
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Save configuration to a file.
fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::file("write", path, e))?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::file("write", path, e))
}

fn env_var(suffix: &str) -> Option<(String, String)> {
    let name = format!("{ENV_PREFIX}_{suffix}");
    std::env::var(&name).ok().map(|value| (name, value))
}

fn parse_env<T: FromStr>(name: &str, value: &str, what: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env(name, format!("'{value}' is not a valid {what}")))
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern `SERIAL_SHARER_<SECTION>_<KEY>`:
/// - `SERIAL_SHARER_SHARED_DEVICE=/dev/ttyUSB0`
/// - `SERIAL_SHARER_CONTROLLERS=/dev/ttyUSB1,/dev/ttyUSB2`
/// - `SERIAL_SHARER_LINK_BAUD_RATE=9600`
/// - `SERIAL_SHARER_LINK_READ_TIMEOUT_MS=500`
/// - `SERIAL_SHARER_ARBITER_BACKOFF_MS=50`
/// - `SERIAL_SHARER_LOG_LEVEL=debug`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    if let Some((_, value)) = env_var("SHARED_DEVICE") {
        config.shared.device = Some(value);
    }
    if let Some((_, value)) = env_var("CONTROLLERS") {
        config.controllers.devices = value
            .split(',')
            .map(str::trim)
            .filter(|device| !device.is_empty())
            .map(String::from)
            .collect();
    }

    if let Some((name, value)) = env_var("LINK_BAUD_RATE") {
        config.link.baud_rate = parse_env(&name, &value, "baud rate")?;
    }
    if let Some((name, value)) = env_var("LINK_READ_TIMEOUT_MS") {
        config.link.read_timeout_ms = parse_env(&name, &value, "timeout")?;
    }

    if let Some((name, value)) = env_var("ARBITER_BACKOFF_MS") {
        config.arbiter.backoff_ms = parse_env(&name, &value, "backoff")?;
    }

    if let Some((_, value)) = env_var("LOG_LEVEL") {
        config.logging.level = value;
    }

    Ok(())
}
