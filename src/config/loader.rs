//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "FLOW_SERIAL";

/// Config file name in the current directory
const LOCAL_CONFIG_FILE_NAME: &str = "flow-serial.toml";

/// Config file name inside the platform config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "FLOW_SERIAL_CONFIG";

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
    /// 1. `FLOW_SERIAL_CONFIG` environment variable (explicit path)
    /// 2. `./flow-serial.toml` (current directory)
    /// 3. `<platform config dir>/flow-serial/config.toml`
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables can override any config file values.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        // Still apply env overrides even with defaults
        if let Err(err) = apply_env_overrides(&mut config) {
            warn!(error = %err, "ignoring environment overrides");
            config = Config::default();
        }

        Self {
            config_path: None,
            config,
        }
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
    let cwd_config = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. Platform config directory
    if let Some(app_config) = get_default_config_path() {
        if app_config.exists() {
            return Some(app_config);
        }
    }

    // 4. No config file found - will use defaults
    None
}

/// Get the platform config directory for this application.
pub fn get_default_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "flow-serial").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::file("read", path, e))?;

    Ok(toml::from_str(&content)?)
}

/// Save configuration to a file.
fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::file("create", parent, e))?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::file("write", path, e))
}

fn env_var(section: &str, key: &str) -> (String, Option<String>) {
    let name = format!("{ENV_PREFIX}_{section}_{key}");
    let value = std::env::var(&name).ok();
    (name, value)
}

fn parse_env<T: FromStr>(name: &str, value: &str, expected: &'static str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::environment(name, value, expected))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `FLOW_SERIAL_<SECTION>_<KEY>`
/// For example:
/// - `FLOW_SERIAL_SERIAL_DEVICE=/dev/ttyUSB0`
/// - `FLOW_SERIAL_SERIAL_BAUD=115200`
/// - `FLOW_SERIAL_LOGGING_LEVEL=debug`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Serial overrides
    if let (_, Some(val)) = env_var("SERIAL", "DEVICE") {
        config.serial.device = Some(val);
    }
    if let (name, Some(val)) = env_var("SERIAL", "BAUD") {
        config.serial.baud = parse_env(&name, &val, "a baud rate")?;
    }
    if let (name, Some(val)) = env_var("SERIAL", "CHARACTER_SIZE") {
        config.serial.character_size = parse_env(&name, &val, "a character size")?;
    }
    if let (_, Some(val)) = env_var("SERIAL", "TWO_STOP_BITS") {
        config.serial.two_stop_bits = parse_bool(&val);
    }
    if let (name, Some(val)) = env_var("SERIAL", "PARITY") {
        config.serial.parity = parse_env(&name, &val, "none, odd or even")?;
    }
    if let (name, Some(val)) = env_var("SERIAL", "BUFFER_SIZE") {
        config.serial.buffer_size = parse_env(&name, &val, "a byte count")?;
    }
    if let (name, Some(val)) = env_var("SERIAL", "READ_TIMEOUT_MS") {
        config.serial.read_timeout_ms = Some(parse_env(&name, &val, "milliseconds")?);
    }

    // Logging overrides
    if let (_, Some(val)) = env_var("LOGGING", "LEVEL") {
        config.logging.level = val;
    }
    if let (name, Some(val)) = env_var("LOGGING", "FORMAT") {
        config.logging.format = match val.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => return Err(ConfigError::environment(name, &val, "json, pretty or compact")),
        };
    }
    if let (_, Some(val)) = env_var("LOGGING", "DEBUG") {
        config.logging.debug = parse_bool(&val);
    }

    // Testing overrides (also support legacy TEST_PORT etc.)
    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_TESTING_PORT"))
        .or_else(|_| std::env::var("TEST_PORT"))
    {
        config.testing.port = Some(val);
    }
    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_TESTING_BAUD"))
        .or_else(|_| std::env::var("TEST_BAUD"))
    {
        config.testing.baud = parse_env(
            &format!("{ENV_PREFIX}_TESTING_BAUD or TEST_BAUD"),
            &val,
            "a baud rate",
        )?;
    }
    if let Ok(val) = std::env::var("LOOPBACK_ENABLED") {
        config.testing.loopback_enabled = parse_bool(&val);
    }

    Ok(())
}
