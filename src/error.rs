//! Error types for Solarman V5 client operations
//!
//! The error set is deliberately closed: every failure a caller can observe
//! maps to exactly one [`SolarmanError`] variant, and each variant carries a
//! stable short label plus a retryability classification consumed by the
//! request engine's retry loop.

use thiserror::Error;

/// Result type for Solarman V5 operations
pub type Result<T> = std::result::Result<T, SolarmanError>;

/// Structural failure of a V5 envelope
///
/// Produced by the streaming decoder (framing checks) and the response
/// parser (content checks). Always surfaced to callers wrapped in
/// [`SolarmanError::V5Frame`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// First byte of the frame is not the 0xA5 start marker
    #[error("invalid start byte: 0x{0:02X}")]
    InvalidStartByte(u8),

    /// Last byte of the frame is not the 0x15 end marker
    #[error("invalid end byte: 0x{0:02X}")]
    InvalidEndByte(u8),

    /// Declared payload length is impossible
    #[error("invalid payload length: {0}")]
    InvalidLength(u16),

    /// Declared payload length implies a frame larger than the cap
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Frame is shorter than the minimum valid response envelope
    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// Declared payload length disagrees with the received byte count
    #[error("length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Trailing checksum byte does not match the recomputed sum
    #[error("invalid checksum: expected 0x{expected:02X}, got 0x{actual:02X}")]
    InvalidChecksum { expected: u8, actual: u8 },

    /// Control code is not the 0x1510 response code (request echoes and
    /// heartbeat frames land here)
    #[error("invalid control code: 0x{0:04X}")]
    InvalidControlCode(u16),

    /// Transport closed mid-frame with bytes left in the decode buffer
    #[error("incomplete frame at end of stream: {0} bytes buffered")]
    IncompleteFrame(usize),
}

/// Solarman V5 client errors
#[derive(Debug, Error, Clone)]
pub enum SolarmanError {
    /// Not connected and the reconnect policy forbids connecting
    #[error("not connected")]
    NotConnected,

    /// `connect()` called while already connected
    #[error("already connected")]
    AlreadyConnected,

    /// Transport failed to establish
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation exceeded the configured deadline
    #[error("operation timed out")]
    Timeout,

    /// Transport write or read failure
    #[error("io error: {0}")]
    Io(String),

    /// Transport became inactive while a request was outstanding
    #[error("channel closed")]
    ChannelClosed,

    /// Structurally invalid V5 envelope
    #[error("v5 frame error: {0}")]
    V5Frame(#[from] FrameError),

    /// Response sequence does not correspond to the request (low byte)
    #[error("sequence mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    SequenceMismatch { expected: u16, actual: u16 },

    /// Device returned a Modbus exception PDU
    #[error("modbus exception: code 0x{0:02X}")]
    ModbusException(u8),

    /// Modbus RTU response failed CRC, length, unit, function, or
    /// byte-count validation
    #[error("rtu error: {0}")]
    Rtu(String),

    /// Argument failed the per-operation range check
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<std::io::Error> for SolarmanError {
    fn from(err: std::io::Error) -> Self {
        SolarmanError::Io(err.to_string())
    }
}

impl SolarmanError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        SolarmanError::ConnectionFailed(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        SolarmanError::Io(msg.into())
    }

    pub fn rtu(msg: impl Into<String>) -> Self {
        SolarmanError::Rtu(msg.into())
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        SolarmanError::InvalidParameter(msg.into())
    }

    /// Whether the request engine may retry after this error
    ///
    /// Transport-level failures are retryable (the next attempt reconnects
    /// per policy); protocol-level disagreements are not — retrying a frame
    /// the device already rejected or mangled cannot succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SolarmanError::ConnectionFailed(_)
                | SolarmanError::Timeout
                | SolarmanError::Io(_)
                | SolarmanError::ChannelClosed
        )
    }

    /// Stable short label for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            SolarmanError::NotConnected => "not_connected",
            SolarmanError::AlreadyConnected => "already_connected",
            SolarmanError::ConnectionFailed(_) => "connection_failed",
            SolarmanError::Timeout => "timeout",
            SolarmanError::Io(_) => "io_error",
            SolarmanError::ChannelClosed => "channel_closed",
            SolarmanError::V5Frame(_) => "v5_frame_error",
            SolarmanError::SequenceMismatch { .. } => "sequence_mismatch",
            SolarmanError::ModbusException(_) => "modbus_exception",
            SolarmanError::Rtu(_) => "rtu_error",
            SolarmanError::InvalidParameter(_) => "invalid_parameter",
        }
    }
}
