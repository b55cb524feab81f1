//! Solarman V5 protocol constants
//!
//! The V5 envelope wraps a Modbus RTU frame with a fixed-width header,
//! a one-byte additive checksum and an end marker. Layout (request form,
//! multi-byte fields little-endian):
//!
//! ```text
//! [Start(1)][Length(2)][Control(2)][Sequence(2)][Serial(4)]
//! [FrameType(1)][SensorType(2)][TotalWork(4)][PowerOn(4)][Offset(4)]
//! [Modbus RTU(N)][Checksum(1)][End(1)]
//! ```
//!
//! The response form replaces the 2-byte sensor type with a 1-byte status,
//! shifting the Modbus payload to offset 25.

// ============================================================================
// Envelope Markers and Control Codes
// ============================================================================

/// Start-of-frame marker
pub const V5_START_BYTE: u8 = 0xA5;

/// End-of-frame marker
pub const V5_END_BYTE: u8 = 0x15;

/// Control code carried by request frames (little-endian on the wire)
pub const V5_CONTROL_REQUEST: u16 = 0x4510;

/// Control code carried by response frames
pub const V5_CONTROL_RESPONSE: u16 = 0x1510;

/// Frame type for frames addressed to the inverter behind the stick
pub const V5_FRAME_TYPE_INVERTER: u8 = 0x02;

/// Response status value indicating success
pub const V5_STATUS_OK: u8 = 0x01;

// ============================================================================
// Envelope Geometry
// ============================================================================

/// Envelope bytes around the Modbus payload in a request frame
///
/// Start(1) + Length(2) + Control(2) + Sequence(2) + Serial(4) +
/// FrameType(1) + SensorType(2) + 3 × time counters(12) + Checksum(1) +
/// End(1) = 28 bytes; total request frame = 28 + N.
pub const V5_REQUEST_OVERHEAD: usize = 28;

/// Envelope bytes around the Modbus payload in a response frame
///
/// The response header carries a 1-byte status where the request carries a
/// 2-byte sensor type, so the overhead is one byte less: 27 + N total.
pub const V5_RESPONSE_OVERHEAD: usize = 27;

/// Declared payload length of a request = 15 + N (frame type through
/// payload end)
pub const V5_REQUEST_PAYLOAD_BASE: u16 = 15;

/// Declared payload length of a response = 14 + N
pub const V5_RESPONSE_PAYLOAD_BASE: u16 = 14;

/// Total frame size = declared payload length + 13
///
/// The 13 bytes are everything the length field does not cover: Start(1) +
/// Length(2) + Control(2) + Sequence(2) + Serial(4) + Checksum(1) + End(1).
pub const V5_LENGTH_ENVELOPE: usize = 13;

/// Byte offset of the Modbus RTU payload in a response frame
pub const V5_RESPONSE_MODBUS_OFFSET: usize = 25;

/// Advisory minimum envelope size (an empty-payload frame)
///
/// The parser does not use this directly; responses are checked against
/// [`V5_RESPONSE_MIN_LEN`].
pub const V5_FRAME_MIN_LEN: usize = 28;

/// Minimum acceptable response frame
///
/// 25 header bytes + 5 bytes of minimum Modbus RTU response
/// (unit + function + one data byte + CRC16) + checksum + end marker.
pub const V5_RESPONSE_MIN_LEN: usize = 32;

/// Hard cap on a single V5 frame
///
/// Far above anything a 253-byte Modbus PDU can produce; a declared size
/// beyond this indicates stream corruption, not a large frame.
pub const V5_FRAME_MAX_LEN: usize = 1024;

/// Minimum Modbus RTU response frame: unit + function + data + CRC16
pub const RTU_MIN_FRAME_LEN: usize = 5;

// ============================================================================
// Modbus Operation Limits
// ============================================================================

/// Maximum registers for FC03/FC04 reads
///
/// Response PDU: FC(1) + ByteCount(1) + N × 2 ≤ 253 → N ≤ 125.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum registers for FC16 writes
///
/// Request PDU: FC(1) + Addr(2) + Qty(2) + ByteCount(1) + N × 2 ≤ 253
/// → N ≤ 123.
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Maximum coils for FC01/FC02 reads
///
/// The Modbus specification defines 2000; the PDU bound would allow 2008.
pub const MAX_READ_COILS: u16 = 2000;

/// Maximum coils for FC15 writes
///
/// The Modbus specification defines 1968 (0x7B0); the PDU bound would
/// allow 1976.
pub const MAX_WRITE_COILS: u16 = 1968;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Coils (FC15)
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Mask Write Register (FC22)
pub const FC_MASK_WRITE_REGISTER: u8 = 0x16;

// ============================================================================
// Configuration Defaults
// ============================================================================

/// TCP port the data-logging stick listens on
pub const DEFAULT_PORT: u16 = 8899;

/// Default Modbus unit id of the inverter behind the stick
pub const DEFAULT_UNIT_ID: u8 = 1;

/// Default overall operation timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Default retry count (attempts = retries + 1)
pub const DEFAULT_RETRIES: u32 = 3;

/// Default idle timeout before the connection is closed
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;
