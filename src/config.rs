//! Reader and scanner configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::UhfError;
use crate::frame::DEFAULT_READER_ADDRESS;

/// Longest accepted read timeout, in seconds
pub const MAX_TIMEOUT_S: f64 = 3600.0;
const DEFAULT_TIMEOUT_S: f64 = 1.0;

/// Connection settings for one reader.
///
/// ```toml
/// port = "/dev/ttyUSB0"
/// baud = 57600
/// timeout_s = 1.5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    pub baud: u32,
    /// Bound on every blocking read, in seconds
    pub timeout_s: f64,
    /// Address the reader answers from
    pub reader_address: u8,
    /// Work-mode queries sent before giving up on connect
    pub connect_attempts: u32,
    /// Largest length byte accepted while synchronizing
    pub max_frame_len: u8,
    /// Resync attempts allowed per frame read
    pub max_resync: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud: 57600,
            timeout_s: DEFAULT_TIMEOUT_S,
            reader_address: DEFAULT_READER_ADDRESS,
            connect_attempts: 3,
            max_frame_len: 0xFF,
            max_resync: 64,
        }
    }
}

impl ReaderConfig {
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        Self {
            port: port.into(),
            baud,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_s = timeout.as_secs_f64();
        self
    }

    /// Read timeout; values [`validate`](Self::validate) would reject fall back to the default
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_s)
            .map(|timeout| timeout.min(Duration::from_secs_f64(MAX_TIMEOUT_S)))
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TIMEOUT_S))
    }

    pub fn validate(&self) -> Result<(), UhfError> {
        if self.port.trim().is_empty() {
            return Err(UhfError::Config("port must not be empty".into()));
        }
        if self.baud == 0 {
            return Err(UhfError::Config("baud must be positive".into()));
        }
        if !self.timeout_s.is_finite() || self.timeout_s <= 0.0 || self.timeout_s > MAX_TIMEOUT_S {
            return Err(UhfError::Config(format!(
                "timeout_s must be between 0 and {} seconds, got {}",
                MAX_TIMEOUT_S, self.timeout_s
            )));
        }
        if self.connect_attempts == 0 {
            return Err(UhfError::Config("connect_attempts must be at least 1".into()));
        }
        if self.max_resync == 0 {
            return Err(UhfError::Config("max_resync must be at least 1".into()));
        }
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, UhfError> {
        let config: ReaderConfig = toml::from_str(content).map_err(|e| UhfError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, UhfError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| UhfError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), UhfError> {
        let content = toml::to_string_pretty(self).map_err(|e| UhfError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| UhfError::Config(format!("{}: {}", path.as_ref().display(), e)))
    }
}

/// Settings for the background scanning loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Pause between inventory rounds, in milliseconds
    pub interval_ms: u64,
    /// Send a [`TagEvent`](crate::TagEvent) for every detection
    pub emit_events: bool,
    /// Events held for the consumer; further detections are dropped and counted
    pub event_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_ms: 50,
            emit_events: true,
            event_capacity: 1024,
        }
    }
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReaderConfig::default();
        assert_eq!(config.baud, 57600);
        assert_eq!(config.timeout(), Duration::from_secs(1));
        assert_eq!(config.reader_address, 0x00);
    }

    #[test]
    fn test_from_toml_with_defaults() {
        let config = ReaderConfig::from_toml_str(
            r#"
            port = "/dev/ttyUSB0"
            timeout_s = 1.5
            "#,
        )
        .unwrap();
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud, 57600);
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert_eq!(config.connect_attempts, 3);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            ReaderConfig::from_toml_str("baud = 57600"),
            Err(UhfError::Config(_))
        ));
        assert!(ReaderConfig::new("/dev/ttyS0", 0).validate().is_err());

        let mut config = ReaderConfig::new("/dev/ttyS0", 57600);
        config.timeout_s = 0.0;
        assert!(config.validate().is_err());
        config.timeout_s = f64::NAN;
        assert!(config.validate().is_err());
        config.timeout_s = 2.0;
        assert!(config.validate().is_ok());
        config.max_resync = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_timeout_is_rejected() {
        assert!(matches!(
            ReaderConfig::from_toml_str("port = \"COM3\"\ntimeout_s = 1e20"),
            Err(UhfError::Config(_))
        ));

        let mut config = ReaderConfig::new("COM3", 57600);
        config.timeout_s = 1e20;
        assert!(config.validate().is_err());
        assert_eq!(config.timeout(), Duration::from_secs(1));
        config.timeout_s = 1e10;
        assert_eq!(config.timeout(), Duration::from_secs(3600));
        config.timeout_s = f64::NAN;
        assert_eq!(config.timeout(), Duration::from_secs(1));
        config.timeout_s = MAX_TIMEOUT_S;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            ReaderConfig::from_toml_str("port = ["),
            Err(UhfError::Config(_))
        ));
    }

    #[test]
    fn test_save_and_load_file() {
        let path = std::env::temp_dir().join(format!("uhf-reader-config-{}.toml", std::process::id()));
        let config = ReaderConfig::new("COM3", 115200).with_timeout(Duration::from_secs(2));
        config.save_to_file(&path).unwrap();

        let loaded = ReaderConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ReaderConfig::load_from_file("/nonexistent/uhf-reader.toml"),
            Err(UhfError::Config(_))
        ));
    }

    #[test]
    fn test_scan_config_defaults() {
        let scan: ScanConfig = toml::from_str("interval_ms = 20").unwrap();
        assert_eq!(scan.interval(), Duration::from_millis(20));
        assert!(scan.emit_events);
        assert_eq!(scan.event_capacity, 1024);
    }
}
