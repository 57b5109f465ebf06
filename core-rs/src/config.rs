/**
 * config.rs
 * Allocator configuration (YAML file + environment overrides)
 *
 * Format:
 * ```yaml
 * portRangeLow: 57830
 * portRangeHigh: 57929
 * lockDirectory: /tmp
 * lockFilePrefix: portlock-
 * ```
 *
 * Precedence (lowest first): defaults, YAML file, environment.
 * Every cooperating process must resolve lockDirectory to the same path on
 * the same host, otherwise their locks never meet.
 */

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::PortLockError;
use crate::port::PortRange;

pub const DEFAULT_PORT_RANGE_LOW: u16 = 57830;
pub const DEFAULT_PORT_RANGE_HIGH: u16 = 57929;
pub const DEFAULT_LOCK_FILE_PREFIX: &str = "portlock-";

/// Names a YAML config file to start from
pub const ENV_CONFIG: &str = "PORTLOCK_CONFIG";
pub const ENV_RANGE_LOW: &str = "PORTLOCK_RANGE_LOW";
pub const ENV_RANGE_HIGH: &str = "PORTLOCK_RANGE_HIGH";
pub const ENV_LOCK_DIR: &str = "PORTLOCK_LOCK_DIR";
pub const ENV_LOCK_PREFIX: &str = "PORTLOCK_LOCK_PREFIX";

/// Allocator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AllocatorConfig {
    pub port_range_low: u16,
    pub port_range_high: u16,
    pub lock_directory: PathBuf,
    pub lock_file_prefix: String,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            port_range_low: DEFAULT_PORT_RANGE_LOW,
            port_range_high: DEFAULT_PORT_RANGE_HIGH,
            lock_directory: std::env::temp_dir(),
            lock_file_prefix: DEFAULT_LOCK_FILE_PREFIX.to_string(),
        }
    }
}

impl AllocatorConfig {
    /// Create a config for an explicit range and lock directory, default prefix
    pub fn new<P: Into<PathBuf>>(low: u16, high: u16, lock_directory: P) -> Self {
        AllocatorConfig {
            port_range_low: low,
            port_range_high: high,
            lock_directory: lock_directory.into(),
            lock_file_prefix: DEFAULT_LOCK_FILE_PREFIX.to_string(),
        }
    }

    /// Load config from a YAML file
    ///
    /// Missing keys take their defaults. The result is validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PortLockError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(PortLockError::FileNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let content = fs::read_to_string(path)?;

        let config: AllocatorConfig = serde_yaml::from_str(&content).map_err(|e| {
            PortLockError::ParseError(format!("Invalid config YAML {}: {}", path.display(), e))
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Build config from the process environment
    ///
    /// Starts from `PORTLOCK_CONFIG` if set, otherwise defaults, then applies
    /// the `PORTLOCK_*` overrides.
    pub fn from_env() -> Result<Self, PortLockError> {
        let mut config = match std::env::var_os(ENV_CONFIG) {
            Some(path) => Self::load(PathBuf::from(path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `PORTLOCK_*` style overrides from a lookup function, then validate
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), PortLockError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(low) = lookup(ENV_RANGE_LOW) {
            self.port_range_low = parse_port(ENV_RANGE_LOW, &low)?;
        }
        if let Some(high) = lookup(ENV_RANGE_HIGH) {
            self.port_range_high = parse_port(ENV_RANGE_HIGH, &high)?;
        }
        if let Some(dir) = lookup(ENV_LOCK_DIR) {
            if !dir.trim().is_empty() {
                self.lock_directory = PathBuf::from(dir);
            }
        }
        if let Some(prefix) = lookup(ENV_LOCK_PREFIX) {
            self.lock_file_prefix = prefix;
        }
        self.validate()
    }

    /// Validate config
    ///
    /// Ensures:
    /// - 0 < portRangeLow <= portRangeHigh
    /// - lockFilePrefix is non-empty and has no path separator
    /// - lockDirectory is non-empty
    pub fn validate(&self) -> Result<(), PortLockError> {
        self.port_range()?;

        if self.lock_file_prefix.is_empty()
            || self.lock_file_prefix.contains('/')
            || self.lock_file_prefix.contains('\\')
        {
            return Err(PortLockError::InvalidPrefix(self.lock_file_prefix.clone()));
        }

        if self.lock_directory.as_os_str().is_empty() {
            return Err(PortLockError::ValidationError(
                "lockDirectory cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Candidate range as a validated `PortRange`
    pub fn port_range(&self) -> Result<PortRange, PortLockError> {
        PortRange::new(self.port_range_low, self.port_range_high)
    }

    /// Marker file path for a candidate port
    ///
    /// `{lockDirectory}/{lockFilePrefix}{port}.lock`
    pub fn marker_path(&self, port: u16) -> PathBuf {
        self.lock_directory.join(marker_file_name(&self.lock_file_prefix, port))
    }

    /// Save config as YAML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PortLockError> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path.as_ref(), yaml)?;
        Ok(())
    }
}

/// File name of the marker for `port` under `prefix`
pub fn marker_file_name(prefix: &str, port: u16) -> String {
    format!("{}{}.lock", prefix, port)
}

/// Inverse of `marker_file_name`; None for unrelated files
pub fn parse_marker_file_name(prefix: &str, file_name: &str) -> Option<u16> {
    file_name
        .strip_prefix(prefix)?
        .strip_suffix(".lock")?
        .parse()
        .ok()
}

fn parse_port(key: &str, value: &str) -> Result<u16, PortLockError> {
    value
        .trim()
        .parse()
        .map_err(|e| PortLockError::ParseError(format!("{}={:?}: {}", key, value, e)))
}
