//! Dispatch configuration
//!
//! Every tunable of the dispatch queue lives in [`DispatchConfig`]. Presets
//! cover the common deployments; the builder covers the rest and validates
//! before handing the config out.

use std::path::{Path, PathBuf};

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::{Result, RiverError};

/// Default response timeout for queued requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Default response timeout for realtime requests
pub const DEFAULT_REALTIME_TIMEOUT: Duration = Duration::from_secs(3);

// ----------------------------------------------------------------------------
// Dispatch Configuration
// ----------------------------------------------------------------------------

/// Configuration for the durable dispatch queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Directory holding the queue log and cursor
    pub data_dir: PathBuf,
    /// Timeout applied to queued requests submitted with a zero timeout
    pub default_request_timeout: Duration,
    /// Timeout for requests sent through the realtime path
    pub realtime_timeout: Duration,
    /// How often the distributor re-checks an unusable network
    pub network_poll_interval: Duration,
    /// Upper bound on concurrently running executors
    pub max_in_flight: usize,
    /// Tries to open the queue directory before giving up
    pub open_attempts: u32,
    /// Pause between open tries
    pub open_retry_delay: Duration,
    /// Capacity of the buffer for responses nobody waits for
    pub orphan_buffer_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("river-queue"),
            default_request_timeout: DEFAULT_REQUEST_TIMEOUT,
            realtime_timeout: DEFAULT_REALTIME_TIMEOUT,
            network_poll_interval: Duration::from_secs(1),
            max_in_flight: 64,
            open_attempts: 10,
            open_retry_delay: Duration::from_millis(100),
            orphan_buffer_capacity: 256,
        }
    }
}

impl DispatchConfig {
    /// Create a builder seeded with the defaults
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::new()
    }

    /// Short timeouts and fast polling for test suites
    pub fn testing() -> Self {
        Self {
            data_dir: std::env::temp_dir().join("river-queue-test"),
            default_request_timeout: Duration::from_millis(500),
            realtime_timeout: Duration::from_millis(500),
            network_poll_interval: Duration::from_millis(20),
            max_in_flight: 8,
            open_attempts: 2,
            open_retry_delay: Duration::from_millis(10),
            orphan_buffer_capacity: 32,
        }
    }

    /// Tighter timeouts for interactive clients on good links
    pub fn low_latency() -> Self {
        Self {
            default_request_timeout: Duration::from_secs(2),
            realtime_timeout: Duration::from_secs(1),
            network_poll_interval: Duration::from_millis(250),
            ..Self::default()
        }
    }

    /// Same config rooted at another directory
    pub fn with_data_dir<P: AsRef<Path>>(mut self, data_dir: P) -> Self {
        self.data_dir = data_dir.as_ref().to_path_buf();
        self
    }

    /// Parse from JSON and validate
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RiverError::config_error(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(RiverError::config_error("Data directory cannot be empty"));
        }
        if self.default_request_timeout.is_zero() {
            return Err(RiverError::config_error(
                "Default request timeout cannot be zero",
            ));
        }
        if self.realtime_timeout.is_zero() {
            return Err(RiverError::config_error("Realtime timeout cannot be zero"));
        }
        if self.network_poll_interval.is_zero() {
            return Err(RiverError::config_error(
                "Network poll interval cannot be zero",
            ));
        }
        if self.max_in_flight == 0 {
            return Err(RiverError::config_error("Max in-flight cannot be zero"));
        }
        if self.open_attempts == 0 {
            return Err(RiverError::config_error("Open attempts cannot be zero"));
        }
        if self.orphan_buffer_capacity == 0 {
            return Err(RiverError::config_error(
                "Orphan buffer capacity cannot be zero",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Configuration Builder
// ----------------------------------------------------------------------------

/// Builder for [`DispatchConfig`]
#[derive(Debug, Clone, Default)]
pub struct DispatchConfigBuilder {
    config: DispatchConfig,
}

impl DispatchConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the testing preset
    pub fn testing(mut self) -> Self {
        let data_dir = self.config.data_dir.clone();
        self.config = DispatchConfig::testing();
        if data_dir != DispatchConfig::default().data_dir {
            self.config.data_dir = data_dir;
        }
        self
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, data_dir: P) -> Self {
        self.config.data_dir = data_dir.as_ref().to_path_buf();
        self
    }

    pub fn default_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_request_timeout = timeout;
        self
    }

    pub fn realtime_timeout(mut self, timeout: Duration) -> Self {
        self.config.realtime_timeout = timeout;
        self
    }

    pub fn network_poll_interval(mut self, interval: Duration) -> Self {
        self.config.network_poll_interval = interval;
        self
    }

    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.config.max_in_flight = max_in_flight;
        self
    }

    pub fn open_attempts(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.config.open_attempts = attempts;
        self.config.open_retry_delay = retry_delay;
        self
    }

    pub fn orphan_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.orphan_buffer_capacity = capacity;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<DispatchConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Return the configuration without validation
    pub fn build_unchecked(self) -> DispatchConfig {
        self.config
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(DispatchConfig::default().validate().is_ok());
        assert!(DispatchConfig::testing().validate().is_ok());
        assert!(DispatchConfig::low_latency().validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = DispatchConfig::default();
        assert_eq!(config.default_request_timeout, Duration::from_secs(3));
        assert_eq!(config.network_poll_interval, Duration::from_secs(1));
        assert_eq!(config.max_in_flight, 64);
        assert_eq!(config.open_attempts, 10);
        assert_eq!(config.open_retry_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_builder_validation() {
        let result = DispatchConfig::builder().max_in_flight(0).build();
        assert!(matches!(result, Err(RiverError::Configuration { .. })));

        let config = DispatchConfig::builder()
            .data_dir("/tmp/river")
            .testing()
            .max_in_flight(1)
            .build()
            .expect("valid config");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/river"));
        assert_eq!(config.max_in_flight, 1);
        assert_eq!(config.network_poll_interval, Duration::from_millis(20));
    }

    #[test]
    fn test_json_round_trip_and_rejection() {
        let config = DispatchConfig::low_latency().with_data_dir("/var/lib/river");
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(DispatchConfig::from_json_str(&json).unwrap(), config);

        let broken = json.replace("\"max_in_flight\":64", "\"max_in_flight\":0");
        assert!(DispatchConfig::from_json_str(&broken).is_err());
        assert!(DispatchConfig::from_json_str("{not json").is_err());
    }
}
