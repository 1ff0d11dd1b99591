//! Bus configuration and layered loading.
//!
//! Precedence, lowest to highest:
//! 1. Embedded `defaults.toml`
//! 2. Optional TOML file
//! 3. `BEACON_*` environment variables

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Environment variables consulted by [`load`].
const ENV_DISPATCH_MODE: &str = "BEACON_DISPATCH_MODE";
const ENV_MAX_HANDLERS: &str = "BEACON_MAX_HANDLERS_PER_EVENT";
const ENV_CATCH_PANICS: &str = "BEACON_CATCH_PANICS";

/// Upper bound for `max_handlers_per_event`.
const MAX_HANDLERS_UPPER_BOUND: usize = 1_000_000;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// Path to the config file that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML configuration.
    #[error("Failed to parse config file at {path}: {source}")]
    ParseError {
        /// Path to the config file that failed to parse.
        path: String,
        /// Underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A value was out of range or malformed.
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        /// Field or variable that was rejected.
        field: String,
        /// What was wrong with it.
        message: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// How handlers of one emission are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One after another in registration order.
    #[default]
    Sequential,
    /// All at once; no ordering between handlers.
    Concurrent,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Concurrent => write!(f, "concurrent"),
        }
    }
}

impl std::str::FromStr for DispatchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "concurrent" => Ok(Self::Concurrent),
            other => Err(ConfigError::InvalidValue {
                field: "dispatch_mode".to_string(),
                message: format!("expected 'sequential' or 'concurrent', got '{other}'"),
            }),
        }
    }
}

/// Configuration for an [`EventBus`](crate::EventBus).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Scheduling of handlers within one emission.
    #[serde(default)]
    pub dispatch_mode: DispatchMode,

    /// Maximum handlers per event name (0 = unlimited).
    #[serde(default)]
    pub max_handlers_per_event: usize,

    /// Whether handler panics are caught and reported as failures.
    #[serde(default = "default_true")]
    pub catch_panics: bool,
}

fn default_true() -> bool {
    true
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            dispatch_mode: DispatchMode::Sequential,
            max_handlers_per_event: 0,
            catch_panics: true,
        }
    }
}

impl BusConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dispatch mode.
    #[must_use]
    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    /// Cap the handlers per event name.
    #[must_use]
    pub fn with_max_handlers_per_event(mut self, max: usize) -> Self {
        self.max_handlers_per_event = max;
        self
    }

    /// Let handler panics unwind through `emit`.
    #[must_use]
    pub fn without_panic_catching(mut self) -> Self {
        self.catch_panics = false;
        self
    }

    /// Load from a single file on top of the embedded defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_file(path: &Path) -> ConfigResult<Self> {
        load_with_env(Some(path), &HashMap::new())
    }

    /// Check that every value is in range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_handlers_per_event > MAX_HANDLERS_UPPER_BOUND {
            return Err(ConfigError::InvalidValue {
                field: "max_handlers_per_event".to_owned(),
                message: format!(
                    "{} exceeds the upper bound of {MAX_HANDLERS_UPPER_BOUND} (use 0 for unlimited)",
                    self.max_handlers_per_event
                ),
            });
        }
        Ok(())
    }
}

/// Load configuration with full precedence, reading `BEACON_*` variables
/// from the process environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is malformed or an environment
/// variable holds an invalid value.
pub fn load(path: Option<&Path>) -> ConfigResult<BusConfig> {
    load_with_env(path, &collect_env_vars())
}

/// Load configuration using an explicit set of environment variables.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is malformed or an environment
/// variable holds an invalid value.
pub fn load_with_env(
    path: Option<&Path>,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<BusConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    if let Some(path) = path {
        let overlay = read_file(path)?;
        merge_tables(&mut merged, overlay);
        info!(path = %path.display(), "loaded bus config");
    }

    let mut config: BusConfig =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: path.map_or_else(|| "<defaults>".to_owned(), |p| p.display().to_string()),
                source: e,
            })?;

    let applied = apply_env_overrides(&mut config, env_vars)?;
    if applied > 0 {
        debug!(count = applied, "applied environment variable overrides");
    }

    config.validate()?;
    Ok(config)
}

/// Collect the `BEACON_*` variables from the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("BEACON_"))
        .collect()
}

fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::InvalidValue {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })
}

/// Overlay `overlay` onto `base`, key by key.
fn merge_tables(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_tables(existing, value),
                    None => {
                        base.insert(key, value);
                    },
                }
            }
        },
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(
    config: &mut BusConfig,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<usize> {
    let mut applied = 0_usize;

    if let Some(mode) = env_vars.get(ENV_DISPATCH_MODE) {
        config.dispatch_mode = mode.parse()?;
        applied = applied.saturating_add(1);
    }

    if let Some(max) = env_vars.get(ENV_MAX_HANDLERS) {
        config.max_handlers_per_event =
            max.trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                    field: ENV_MAX_HANDLERS.to_string(),
                    message: e.to_string(),
                })?;
        applied = applied.saturating_add(1);
    }

    if let Some(flag) = env_vars.get(ENV_CATCH_PANICS) {
        config.catch_panics = parse_bool(ENV_CATCH_PANICS, flag)?;
        applied = applied.saturating_add(1);
    }

    Ok(applied)
}

fn parse_bool(field: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_match_embedded_toml() {
        let config = load_with_env(None, &HashMap::new()).unwrap();
        assert_eq!(config, BusConfig::default());
        assert_eq!(config.dispatch_mode, DispatchMode::Sequential);
        assert!(config.catch_panics);
    }

    #[test]
    fn test_builder() {
        let config = BusConfig::new()
            .with_dispatch_mode(DispatchMode::Concurrent)
            .with_max_handlers_per_event(8)
            .without_panic_catching();

        assert_eq!(config.dispatch_mode, DispatchMode::Concurrent);
        assert_eq!(config.max_handlers_per_event, 8);
        assert!(!config.catch_panics);
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "dispatch_mode = \"concurrent\"").unwrap();

        let config = BusConfig::load_file(file.path()).unwrap();
        assert_eq!(config.dispatch_mode, DispatchMode::Concurrent);
        // Untouched keys keep their defaults.
        assert!(config.catch_panics);
        assert_eq!(config.max_handlers_per_event, 0);
    }

    #[test]
    fn test_load_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = BusConfig::load_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn test_load_file_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "dispatch_mode = \"sideways\"").unwrap();

        let err = BusConfig::load_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_handlers_per_event = 4").unwrap();

        let vars = env(&[
            ("BEACON_DISPATCH_MODE", "Concurrent"),
            ("BEACON_MAX_HANDLERS_PER_EVENT", "16"),
            ("BEACON_CATCH_PANICS", "off"),
        ]);

        let config = load_with_env(Some(file.path()), &vars).unwrap();
        assert_eq!(config.dispatch_mode, DispatchMode::Concurrent);
        assert_eq!(config.max_handlers_per_event, 16);
        assert!(!config.catch_panics);
    }

    #[test]
    fn test_env_invalid_values() {
        let err = load_with_env(None, &env(&[("BEACON_DISPATCH_MODE", "random")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err =
            load_with_env(None, &env(&[("BEACON_MAX_HANDLERS_PER_EVENT", "-1")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = load_with_env(None, &env(&[("BEACON_CATCH_PANICS", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validate_handler_bound() {
        let err = load_with_env(
            None,
            &env(&[("BEACON_MAX_HANDLERS_PER_EVENT", "2000000")]),
        )
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "max_handlers_per_event")
        );

        assert!(BusConfig::new().with_max_handlers_per_event(64).validate().is_ok());
    }

    #[test]
    fn test_dispatch_mode_serialization() {
        let json = serde_json::to_string(&DispatchMode::Concurrent).unwrap();
        assert_eq!(json, "\"concurrent\"");
        assert_eq!(DispatchMode::Sequential.to_string(), "sequential");
    }
}
