//! Client configuration
//!
//! The configuration record is immutable after construction; everything the
//! client does at runtime is driven by it. Durations are stored as
//! millisecond fields so the struct round-trips through serde cleanly, with
//! `Duration` accessors for the call sites.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_PORT, DEFAULT_RETRIES, DEFAULT_TIMEOUT_MS, DEFAULT_UNIT_ID,
};

/// Reconnect policy consulted at the start of a request attempt when the
/// client is not connected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ReconnectStrategy {
    /// Never reconnect; requests fail with `NotConnected`
    Disabled,
    /// One connect attempt per request, no delay
    #[default]
    Immediate,
    /// Sleep for a doubling delay before each connect attempt, capped at
    /// `max_ms`; the delay resets on a successful connect
    ExponentialBackoff { initial_ms: u64, max_ms: u64 },
}

/// Solarman V5 client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolarmanConfig {
    /// Hostname or IP of the data-logging stick
    pub host: String,

    /// TCP port (sticks listen on 8899)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Serial number of the stick, as printed on its label
    pub logger_serial: u32,

    /// Modbus unit id of the inverter behind the stick
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Overall per-operation deadline (covers the whole attempt)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retry count; total attempts = retries + 1
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Close the connection after this much inactivity; `None` disables
    /// the idle watchdog
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: Option<u64>,

    /// Reconnect policy
    #[serde(default)]
    pub reconnect: ReconnectStrategy,

    /// Opt-in double-CRC correction for sticks that append the Modbus CRC
    /// twice
    #[serde(default)]
    pub error_correction: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_unit_id() -> u8 {
    DEFAULT_UNIT_ID
}
fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}
fn default_retries() -> u32 {
    DEFAULT_RETRIES
}
fn default_idle_timeout_ms() -> Option<u64> {
    Some(DEFAULT_IDLE_TIMEOUT_MS)
}

impl SolarmanConfig {
    /// Create a configuration with defaults for everything but the target
    pub fn new(host: impl Into<String>, logger_serial: u32) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            logger_serial,
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            idle_timeout_ms: default_idle_timeout_ms(),
            reconnect: ReconnectStrategy::default(),
            error_correction: false,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout_ms = idle_timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn with_reconnect(mut self, strategy: ReconnectStrategy) -> Self {
        self.reconnect = strategy;
        self
    }

    pub fn with_error_correction(mut self, enabled: bool) -> Self {
        self.error_correction = enabled;
        self
    }

    /// Per-operation deadline as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Idle watchdog period as a `Duration`
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}
