//! V5 envelope construction and parsing
//!
//! A request wraps the Modbus RTU frame in the fixed header described in
//! [`crate::constants`]; a response is validated with ordered structural
//! checks before any field is projected. The check order matters: size
//! first (so every later indexed read is in bounds), markers before the
//! length cross-check, length before checksum (a length lie could
//! otherwise hide behind a checksum computed over a crafted shorter
//! frame), and the control code only after integrity is established.

use tracing::{debug, trace};

use crate::constants::*;
use crate::error::{FrameError, Result};
use crate::rtu;

// Response field offsets (request frames shift by one past the status byte)
const LENGTH_OFFSET: usize = 1;
const CONTROL_OFFSET: usize = 3;
const SEQUENCE_OFFSET: usize = 5;
const SERIAL_OFFSET: usize = 7;
const FRAME_TYPE_OFFSET: usize = 11;
const STATUS_OFFSET: usize = 12;
const TOTAL_WORKING_TIME_OFFSET: usize = 13;
const POWER_ON_TIME_OFFSET: usize = 17;
const OFFSET_TIME_OFFSET: usize = 21;

/// One-byte additive checksum: sum of all bytes mod 256
///
/// Applied over the envelope range `[1, len - 2)` — everything except the
/// start marker, the checksum byte itself, and the end marker. An empty
/// range yields 0.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte))
}

/// Build a V5 request envelope around a Modbus RTU frame
///
/// The Modbus frame is treated as opaque payload (it may be empty); no
/// validation of its internal shape happens here.
pub fn build_request(logger_serial: u32, sequence: u16, modbus_frame: &[u8]) -> Vec<u8> {
    let payload_len = V5_REQUEST_PAYLOAD_BASE + modbus_frame.len() as u16;
    let mut frame = Vec::with_capacity(V5_REQUEST_OVERHEAD + modbus_frame.len());

    frame.push(V5_START_BYTE);
    frame.extend_from_slice(&payload_len.to_le_bytes());
    frame.extend_from_slice(&V5_CONTROL_REQUEST.to_le_bytes());
    frame.extend_from_slice(&sequence.to_le_bytes());
    frame.extend_from_slice(&logger_serial.to_le_bytes());
    frame.push(V5_FRAME_TYPE_INVERTER);
    // Sensor type (2) + total working / power-on / offset time counters (12),
    // all zero in frames originated by the client
    frame.extend_from_slice(&[0u8; 14]);
    frame.extend_from_slice(modbus_frame);

    let sum = checksum(&frame[1..]);
    frame.push(sum);
    frame.push(V5_END_BYTE);

    debug!(
        "Building V5 request: seq={:04X}, serial={:08X}, rtu_len={}, total={}",
        sequence,
        logger_serial,
        modbus_frame.len(),
        frame.len()
    );

    frame
}

/// Validated V5 response envelope
///
/// Only constructible through [`V5Response::parse`], after every structural
/// check has passed. The response owns its frame bytes; the Modbus view is
/// a bounded slice into that copy.
#[derive(Debug, Clone)]
pub struct V5Response {
    raw: Vec<u8>,
}

impl V5Response {
    /// Validate a complete candidate envelope and take ownership of it
    ///
    /// Checks run in order and abort on the first failure, each mapping to
    /// a distinct [`FrameError`] kind.
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        let len = raw.len();

        // 1. Minimum size gates every later indexed read
        if len < V5_RESPONSE_MIN_LEN {
            return Err(FrameError::FrameTooShort(len).into());
        }

        // 2. Markers
        if raw[0] != V5_START_BYTE {
            return Err(FrameError::InvalidStartByte(raw[0]).into());
        }
        if raw[len - 1] != V5_END_BYTE {
            return Err(FrameError::InvalidEndByte(raw[len - 1]).into());
        }

        // 3. Length cross-check
        let declared_payload = u16::from_le_bytes([raw[LENGTH_OFFSET], raw[LENGTH_OFFSET + 1]]);
        let declared_total = declared_payload as usize + V5_LENGTH_ENVELOPE;
        if len != declared_total {
            return Err(FrameError::LengthMismatch {
                declared: declared_total,
                actual: len,
            }
            .into());
        }

        // 4. Checksum over [1, len - 2)
        let expected = checksum(&raw[1..len - 2]);
        let actual = raw[len - 2];
        if expected != actual {
            return Err(FrameError::InvalidChecksum { expected, actual }.into());
        }

        // 5. Control code: only well-formed frames can be misclassified,
        //    so request echoes and heartbeats fail here and nowhere else
        let control = u16::from_le_bytes([raw[CONTROL_OFFSET], raw[CONTROL_OFFSET + 1]]);
        if control != V5_CONTROL_RESPONSE {
            return Err(FrameError::InvalidControlCode(control).into());
        }

        // 6. Modbus minimum size, retained even though step 1 implies it at
        //    this fixed offset
        if len - V5_RESPONSE_MODBUS_OFFSET - 2 < RTU_MIN_FRAME_LEN {
            return Err(FrameError::FrameTooShort(len).into());
        }

        trace!("V5 response validated: {} bytes", len);
        Ok(Self { raw })
    }

    fn u16_at(&self, offset: usize) -> Option<u16> {
        let bytes = self.raw.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32_at(&self, offset: usize) -> Option<u32> {
        let bytes = self.raw.get(offset..offset + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Response sequence number
    pub fn sequence(&self) -> u16 {
        self.u16_at(SEQUENCE_OFFSET).unwrap_or(0)
    }

    /// Logger serial number
    pub fn serial(&self) -> u32 {
        self.u32_at(SERIAL_OFFSET).unwrap_or(0)
    }

    /// Frame type byte; 0x02 in all observed inverter responses but not
    /// validated (behavior of other values is undefined in the field)
    pub fn frame_type(&self) -> u8 {
        self.raw.get(FRAME_TYPE_OFFSET).copied().unwrap_or(0)
    }

    /// Delivery status reported by the stick (0x01 = OK)
    pub fn status(&self) -> u8 {
        self.raw.get(STATUS_OFFSET).copied().unwrap_or(0)
    }

    /// Total working time counter, seconds
    pub fn total_working_time(&self) -> u32 {
        self.u32_at(TOTAL_WORKING_TIME_OFFSET).unwrap_or(0)
    }

    /// Power-on time counter, seconds
    pub fn power_on_time(&self) -> u32 {
        self.u32_at(POWER_ON_TIME_OFFSET).unwrap_or(0)
    }

    /// Offset time counter, seconds
    pub fn offset_time(&self) -> u32 {
        self.u32_at(OFFSET_TIME_OFFSET).unwrap_or(0)
    }

    /// The embedded Modbus RTU frame, CRC included
    pub fn modbus_frame(&self) -> &[u8] {
        self.raw
            .get(V5_RESPONSE_MODBUS_OFFSET..self.raw.len() - 2)
            .unwrap_or(&[])
    }

    /// The whole validated envelope
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

/// Detect and strip a spurious trailing Modbus CRC pair
///
/// Some sticks append the Modbus CRC twice. Because the CRC16 of a frame
/// terminated by its own correct CRC is 0x0000, the defect signature is
/// two trailing zero bytes. Returns `Some(shortened)` only when the
/// shortened frame still carries a valid CRC — the corrector never
/// truncates on a guess.
pub fn fix_double_crc(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < 6 {
        return None;
    }
    if frame[frame.len() - 2..] != [0x00, 0x00] {
        return None;
    }

    let candidate = &frame[..frame.len() - 2];
    if candidate.len() < 4 {
        return None;
    }

    let body = &candidate[..candidate.len() - 2];
    let stored = u16::from_le_bytes([candidate[candidate.len() - 2], candidate[candidate.len() - 1]]);
    if rtu::crc16(body) == stored {
        debug!("Stripped duplicated CRC: {} -> {} bytes", frame.len(), candidate.len());
        Some(candidate)
    } else {
        None
    }
}
