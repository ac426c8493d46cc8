//! Connection manager configuration
//!
//! Stored as pretty JSON. Every field has a default so a partial file (or
//! just `{"vendor": "2341"}`) is enough.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{CommError, CommResult};

/// Largest read buffer accepted from a config file (1 MiB)
pub const MAX_READ_BUFFER_SIZE: usize = 1 << 20;

fn default_baud_rate() -> u32 {
    9600
}

fn default_write_timeout_ms() -> u64 {
    2000
}

fn default_read_poll_ms() -> u64 {
    100
}

fn default_read_buffer_size() -> usize {
    4096
}

/// Settings for a `ConnectionManager`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Target USB vendor ID as 4 hex digits (e.g. "2341")
    #[serde(default)]
    pub vendor: String,
    /// Baud rate the console host opens at when none is given
    #[serde(default = "default_baud_rate")]
    pub default_baud_rate: u32,
    /// Upper bound for a blocking write
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Timeout of each read poll in the background reader
    #[serde(default = "default_read_poll_ms")]
    pub read_poll_ms: u64,
    /// Bytes requested per read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            vendor: String::new(),
            default_baud_rate: default_baud_rate(),
            write_timeout_ms: default_write_timeout_ms(),
            read_poll_ms: default_read_poll_ms(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl ManagerConfig {
    pub fn for_vendor(vendor: &str) -> Self {
        Self {
            vendor: normalize_vendor(vendor),
            ..Self::default()
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }

    /// Check the values that would otherwise fail later at connect time.
    pub fn validate(&self) -> CommResult<()> {
        let vendor = self.vendor.trim();
        if vendor.is_empty() {
            return Err(CommError::Config("vendor cannot be empty".into()));
        }
        if vendor.len() > 4 || !vendor.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CommError::Config(format!(
                "vendor '{vendor}' is not a 4-digit hex USB vendor ID"
            )));
        }
        if self.default_baud_rate == 0 {
            return Err(CommError::Config("default_baud_rate must be non-zero".into()));
        }
        if self.read_buffer_size == 0 || self.read_buffer_size > MAX_READ_BUFFER_SIZE {
            return Err(CommError::Config(format!(
                "read_buffer_size must be between 1 and {MAX_READ_BUFFER_SIZE}"
            )));
        }
        if self.read_poll_ms == 0 {
            return Err(CommError::Config("read_poll_ms must be non-zero".into()));
        }
        Ok(())
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> CommResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CommError::Config(format!("Failed to read config '{}': {e}", path.display()))
        })?;
        let mut config: ManagerConfig = serde_json::from_str(&json).map_err(|e| {
            CommError::Config(format!("Failed to parse config '{}': {e}", path.display()))
        })?;
        config.vendor = normalize_vendor(&config.vendor);
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> CommResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CommError::Config(format!("Serialization error: {e}")))?;
        std::fs::write(path, json).map_err(|e| {
            CommError::Config(format!("Failed to write config '{}': {e}", path.display()))
        })
    }
}

/// Vendors are compared against `{:04X}`, so store them trimmed, uppercase
/// and zero padded ("1a86" → "1A86", "403" → "0403").
pub fn normalize_vendor(vendor: &str) -> String {
    let trimmed = vendor.trim().to_ascii_uppercase();
    if !trimmed.is_empty() && trimmed.len() < 4 {
        format!("{trimmed:0>4}")
    } else {
        trimmed
    }
}
