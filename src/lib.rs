//! # Solarman V5 - Async Data-Logging Stick Client
//!
//! A Modbus RTU client for photovoltaic inverters reached through Solarman
//! WiFi data-logging sticks. The stick wraps Modbus RTU frames in its
//! proprietary V5 envelope and serves them over TCP port 8899; this crate
//! speaks that envelope without disturbing the stick's cloud-facing role.
//!
//! ## Features
//!
//! - **Async throughout**: Tokio-based TCP transport with a background
//!   read loop and strict streaming frame decoder
//! - **Bit-exact V5 codec**: fixed-header envelope construction, ordered
//!   structural validation, additive checksum
//! - **Device-quirk tolerant**: low-byte sequence matching and opt-in,
//!   never-destructive double-CRC correction
//! - **Resilient**: per-request retries, idle-timeout close, disabled /
//!   immediate / exponential-backoff reconnect policies
//! - **Observable**: pluggable metrics hooks and transport counters
//!
//! ## Supported Function Codes
//!
//! | Code | Function |
//! |------|----------|
//! | 0x01 | Read Coils |
//! | 0x02 | Read Discrete Inputs |
//! | 0x03 | Read Holding Registers |
//! | 0x04 | Read Input Registers |
//! | 0x05 | Write Single Coil |
//! | 0x06 | Write Single Register |
//! | 0x0F | Write Multiple Coils |
//! | 0x10 | Write Multiple Registers |
//! | 0x16 | Mask Write Register |
//!
//! Raw RTU passthrough (with or without a caller-supplied CRC) covers
//! anything else the inverter understands.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use solarman_v5::{Result, SolarmanClient, SolarmanConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SolarmanConfig::new("192.168.1.50", 2712345678);
//!     let client = SolarmanClient::new(config);
//!     client.connect().await?;
//!
//!     // Read 10 holding registers starting at address 0x0000
//!     let registers = client.read_holding_registers(0, 10).await?;
//!     println!("Registers: {:?}", registers);
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// V5 protocol constants and Modbus operation limits
pub mod constants;

/// V5 envelope construction, parsing and double-CRC correction
pub mod frame;

/// Streaming frame decoder for the TCP byte stream
pub mod decoder;

/// Request sequence number generation
pub mod sequence;

/// Single-slot response rendezvous
pub mod gate;

/// TCP transport with background read loop
pub mod transport;

/// Modbus RTU frame construction and response parsing
pub mod rtu;

/// Client configuration
pub mod config;

/// Observability hooks
pub mod metrics;

/// The Solarman V5 client
pub mod client;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use client::{with_client, ConnectionState, SolarmanClient};
pub use config::{ReconnectStrategy, SolarmanConfig};
pub use constants::{DEFAULT_PORT, DEFAULT_RETRIES, DEFAULT_TIMEOUT_MS};
pub use error::{FrameError, Result, SolarmanError};
pub use frame::{build_request, checksum, fix_double_crc, V5Response};
pub use metrics::{MetricsHooks, NoopMetrics};
pub use rtu::{RtuParseError, RtuResponse};
pub use transport::{TransportStats, V5Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
