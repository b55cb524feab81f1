//! Modbus RTU frame construction and response parsing
//!
//! The V5 envelope treats the embedded Modbus RTU frame as opaque payload;
//! this module is the layer that actually builds and interprets it. An RTU
//! frame is `[Unit ID(1)][PDU(N)][CRC16(2, little-endian)]`; request PDUs
//! use big-endian fields per the Modbus specification.
//!
//! Builders assume range-checked arguments — the client validates
//! quantities against the protocol limits before any frame is built.

use thiserror::Error;
use tracing::debug;

use crate::constants::*;

/// Modbus RTU response parse failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RtuParseError {
    /// Frame shorter than unit + function + CRC
    #[error("rtu frame too short: {0} bytes")]
    TooShort(usize),

    /// Trailing CRC16 does not match the recomputed value
    #[error("crc mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Response came from a different unit than addressed
    #[error("unit id mismatch: expected {expected}, got {actual}")]
    UnitIdMismatch { expected: u8, actual: u8 },

    /// Response function code does not match the request
    #[error("function code mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    FunctionMismatch { expected: u8, actual: u8 },

    /// Declared byte count disagrees with the data actually present
    #[error("byte count mismatch: declared {declared}, actual {actual}")]
    ByteCountMismatch { declared: usize, actual: usize },

    /// Device answered with a Modbus exception PDU
    #[error("modbus exception: code 0x{0:02X}")]
    Exception(u8),
}

/// Calculate CRC16 checksum (Modbus RTU standard, polynomial 0xA001)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Append the CRC16 of the current frame contents (little-endian)
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Build a read request frame for FC01-04
pub fn build_read_request(unit_id: u8, function: u8, address: u16, quantity: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(unit_id);
    frame.push(function);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&quantity.to_be_bytes());
    append_crc(&mut frame);

    debug!(
        "Building RTU read: unit={}, FC={:02X}, addr={}, qty={}",
        unit_id, function, address, quantity
    );

    frame
}

/// Build a Write Single Register (FC06) request frame
pub fn build_write_single_register(unit_id: u8, address: u16, value: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(unit_id);
    frame.push(FC_WRITE_SINGLE_REGISTER);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&value.to_be_bytes());
    append_crc(&mut frame);
    frame
}

/// Build a Write Single Coil (FC05) request frame
///
/// ON is encoded as 0xFF00, OFF as 0x0000.
pub fn build_write_single_coil(unit_id: u8, address: u16, value: bool) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(unit_id);
    frame.push(FC_WRITE_SINGLE_COIL);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(if value { &[0xFF, 0x00] } else { &[0x00, 0x00] });
    append_crc(&mut frame);
    frame
}

/// Build a Write Multiple Registers (FC16) request frame
pub fn build_write_multiple_registers(unit_id: u8, address: u16, values: &[u16]) -> Vec<u8> {
    let byte_count = values.len() * 2;
    let mut frame = Vec::with_capacity(9 + byte_count);
    frame.push(unit_id);
    frame.push(FC_WRITE_MULTIPLE_REGISTERS);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&(values.len() as u16).to_be_bytes());
    frame.push(byte_count as u8);
    for &value in values {
        frame.extend_from_slice(&value.to_be_bytes());
    }
    append_crc(&mut frame);
    frame
}

/// Build a Write Multiple Coils (FC15) request frame
///
/// Coils are packed LSB-first within each byte.
pub fn build_write_multiple_coils(unit_id: u8, address: u16, values: &[bool]) -> Vec<u8> {
    let byte_count = values.len().div_ceil(8);
    let mut frame = Vec::with_capacity(9 + byte_count);
    frame.push(unit_id);
    frame.push(FC_WRITE_MULTIPLE_COILS);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&(values.len() as u16).to_be_bytes());
    frame.push(byte_count as u8);

    for chunk in values.chunks(8) {
        let mut byte = 0u8;
        for (i, &coil) in chunk.iter().enumerate() {
            if coil {
                byte |= 1 << i;
            }
        }
        frame.push(byte);
    }

    append_crc(&mut frame);
    frame
}

/// Build a Mask Write Register (FC22) request frame
///
/// Result register = (current AND and_mask) OR (or_mask AND NOT and_mask).
pub fn build_mask_write_register(unit_id: u8, address: u16, and_mask: u16, or_mask: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(10);
    frame.push(unit_id);
    frame.push(FC_MASK_WRITE_REGISTER);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&and_mask.to_be_bytes());
    frame.extend_from_slice(&or_mask.to_be_bytes());
    append_crc(&mut frame);
    frame
}

/// Validated Modbus RTU response
///
/// `data` holds the PDU body after the function code; for read responses
/// that is the byte count followed by the payload bytes.
#[derive(Debug, Clone)]
pub struct RtuResponse {
    pub unit_id: u8,
    pub function: u8,
    pub data: Vec<u8>,
}

/// Parse and validate an RTU response frame
///
/// Checks, in order: minimum size, CRC16, unit id, exception bit, function
/// code. Each failure maps to its own [`RtuParseError`] kind so the caller
/// can distinguish a CRC fault (candidate for double-CRC correction) from a
/// device-originated exception.
pub fn parse_response(
    frame: &[u8],
    expected_unit: u8,
    expected_function: u8,
) -> Result<RtuResponse, RtuParseError> {
    if frame.len() < 4 {
        return Err(RtuParseError::TooShort(frame.len()));
    }

    let body = &frame[..frame.len() - 2];
    let stored_crc = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
    let computed_crc = crc16(body);
    if stored_crc != computed_crc {
        return Err(RtuParseError::CrcMismatch {
            expected: computed_crc,
            actual: stored_crc,
        });
    }

    let unit_id = frame[0];
    if unit_id != expected_unit {
        return Err(RtuParseError::UnitIdMismatch {
            expected: expected_unit,
            actual: unit_id,
        });
    }

    let function = frame[1];
    if function & 0x80 != 0 {
        // Exception PDU: [FC | 0x80][exception code]
        if body.len() < 3 {
            return Err(RtuParseError::TooShort(frame.len()));
        }
        return Err(RtuParseError::Exception(frame[2]));
    }

    if function != expected_function {
        return Err(RtuParseError::FunctionMismatch {
            expected: expected_function,
            actual: function,
        });
    }

    debug!(
        "RTU response: unit={}, FC={:02X}, data_len={}",
        unit_id,
        function,
        body.len() - 2
    );

    Ok(RtuResponse {
        unit_id,
        function,
        data: body[2..].to_vec(),
    })
}

impl RtuResponse {
    /// Extract 16-bit register values from a FC03/FC04 response
    ///
    /// The first data byte is the declared byte count; it must match the
    /// payload exactly and describe whole registers.
    pub fn registers(&self) -> Result<Vec<u16>, RtuParseError> {
        if self.data.is_empty() {
            return Err(RtuParseError::ByteCountMismatch {
                declared: 0,
                actual: 0,
            });
        }

        let declared = self.data[0] as usize;
        let payload = &self.data[1..];
        if declared != payload.len() || declared % 2 != 0 {
            return Err(RtuParseError::ByteCountMismatch {
                declared,
                actual: payload.len(),
            });
        }

        Ok(payload
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Extract coil/input states from a FC01/FC02 response
    ///
    /// Bits are packed LSB-first within each byte; the result is truncated
    /// to the requested quantity.
    pub fn bits(&self, quantity: u16) -> Result<Vec<bool>, RtuParseError> {
        if self.data.is_empty() {
            return Err(RtuParseError::ByteCountMismatch {
                declared: 0,
                actual: 0,
            });
        }

        let declared = self.data[0] as usize;
        let payload = &self.data[1..];
        let expected = (quantity as usize).div_ceil(8);
        if declared != payload.len() || declared != expected {
            return Err(RtuParseError::ByteCountMismatch {
                declared,
                actual: payload.len(),
            });
        }

        Ok(payload
            .iter()
            .flat_map(|&byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
            .take(quantity as usize)
            .collect())
    }
}

/// Human-readable description of a Modbus exception code
pub fn exception_description(exception_code: u8) -> &'static str {
    match exception_code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x07 => "Negative Acknowledge",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    // ========================================================================
    // CRC16 Tests
    // ========================================================================

    #[test]
    fn test_crc16_known_value() {
        let data = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(crc16(&data), 0x0A84);
    }

    #[test]
    fn test_crc16_empty_data() {
        // Initial CRC value when no data processed
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_crc16_of_frame_with_valid_crc_is_zero() {
        // The property the double-CRC heuristic rests on
        let mut frame = vec![0x01, 0x03, 0x02, 0x12, 0x34];
        append_crc(&mut frame);
        assert_eq!(crc16(&frame), 0x0000);
    }

    // ========================================================================
    // Request Builder Tests
    // ========================================================================

    #[test]
    fn test_build_read_request_fc03() {
        let frame = build_read_request(1, FC_READ_HOLDING_REGISTERS, 0, 1);
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
    }

    #[test]
    fn test_build_read_request_fc01_high_address() {
        let frame = build_read_request(17, FC_READ_COILS, 0xABCD, 2000);
        assert_eq!(frame[0], 17);
        assert_eq!(frame[1], 0x01);
        assert_eq!(&frame[2..4], &[0xAB, 0xCD]);
        assert_eq!(&frame[4..6], &[0x07, 0xD0]);
        assert_eq!(frame.len(), 8);
    }

    #[test]
    fn test_build_write_single_register() {
        let frame = build_write_single_register(1, 100, 0x1234);
        assert_eq!(&frame[..6], &[0x01, 0x06, 0x00, 0x64, 0x12, 0x34]);
        // CRC self-check
        assert_eq!(crc16(&frame), 0x0000);
    }

    #[test]
    fn test_build_write_single_coil_encoding() {
        let on = build_write_single_coil(1, 5, true);
        assert_eq!(&on[2..6], &[0x00, 0x05, 0xFF, 0x00]);

        let off = build_write_single_coil(1, 5, false);
        assert_eq!(&off[2..6], &[0x00, 0x05, 0x00, 0x00]);
    }

    #[test]
    fn test_build_write_multiple_registers() {
        let frame = build_write_multiple_registers(1, 0x0100, &[0x000A, 0x0102]);
        assert_eq!(
            &frame[..frame.len() - 2],
            &[0x01, 0x10, 0x01, 0x00, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
        assert_eq!(crc16(&frame), 0x0000);
    }

    #[test]
    fn test_build_write_multiple_coils_packing() {
        // 10 coils: 1,0,1,1,0,0,0,1 | 1,0 -> 0x8D, 0x01
        let coils = [
            true, false, true, true, false, false, false, true, true, false,
        ];
        let frame = build_write_multiple_coils(1, 0, &coils);
        assert_eq!(frame[1], FC_WRITE_MULTIPLE_COILS);
        assert_eq!(&frame[4..6], &[0x00, 0x0A]); // quantity 10
        assert_eq!(frame[6], 2); // byte count
        assert_eq!(frame[7], 0x8D);
        assert_eq!(frame[8], 0x01);
    }

    #[test]
    fn test_build_mask_write_register() {
        let frame = build_mask_write_register(1, 4, 0x00F2, 0x0025);
        assert_eq!(
            &frame[..frame.len() - 2],
            &[0x01, 0x16, 0x00, 0x04, 0x00, 0xF2, 0x00, 0x25]
        );
    }

    // ========================================================================
    // Response Parse Tests
    // ========================================================================

    fn response_frame(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        append_crc(&mut frame);
        frame
    }

    #[test]
    fn test_parse_read_response() {
        let frame = response_frame(&[0x01, 0x03, 0x04, 0x00, 0x0A, 0x01, 0x02]);
        let response = parse_response(&frame, 1, 0x03).unwrap();

        assert_eq!(response.unit_id, 1);
        assert_eq!(response.function, 0x03);
        assert_eq!(response.registers().unwrap(), vec![0x000A, 0x0102]);
    }

    #[test]
    fn test_parse_response_too_short() {
        let result = parse_response(&[0x01, 0x03, 0xAB], 1, 0x03);
        assert_eq!(result.unwrap_err(), RtuParseError::TooShort(3));
    }

    #[test]
    fn test_parse_response_crc_mismatch() {
        let mut frame = response_frame(&[0x01, 0x03, 0x02, 0x12, 0x34]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        let result = parse_response(&frame, 1, 0x03);
        assert!(matches!(result, Err(RtuParseError::CrcMismatch { .. })));
    }

    #[test]
    fn test_parse_response_unit_mismatch() {
        let frame = response_frame(&[0x02, 0x03, 0x02, 0x12, 0x34]);
        let result = parse_response(&frame, 1, 0x03);
        assert_eq!(
            result.unwrap_err(),
            RtuParseError::UnitIdMismatch {
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn test_parse_response_function_mismatch() {
        let frame = response_frame(&[0x01, 0x04, 0x02, 0x12, 0x34]);
        let result = parse_response(&frame, 1, 0x03);
        assert_eq!(
            result.unwrap_err(),
            RtuParseError::FunctionMismatch {
                expected: 0x03,
                actual: 0x04
            }
        );
    }

    #[test]
    fn test_parse_response_exception() {
        let frame = response_frame(&[0x01, 0x83, 0x02]);
        let result = parse_response(&frame, 1, 0x03);
        assert_eq!(result.unwrap_err(), RtuParseError::Exception(0x02));
    }

    #[test]
    fn test_parse_write_echo() {
        let frame = response_frame(&[0x01, 0x06, 0x00, 0x64, 0x12, 0x34]);
        let response = parse_response(&frame, 1, 0x06).unwrap();
        assert_eq!(response.data, vec![0x00, 0x64, 0x12, 0x34]);
    }

    // ========================================================================
    // Register / Bit Extraction Tests
    // ========================================================================

    #[test]
    fn test_registers_byte_count_mismatch() {
        let response = RtuResponse {
            unit_id: 1,
            function: 0x03,
            data: vec![0x04, 0x00, 0x0A], // declared 4, only 2 present
        };
        assert!(matches!(
            response.registers(),
            Err(RtuParseError::ByteCountMismatch {
                declared: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_registers_odd_byte_count() {
        let response = RtuResponse {
            unit_id: 1,
            function: 0x03,
            data: vec![0x03, 0x00, 0x0A, 0x01],
        };
        assert!(matches!(
            response.registers(),
            Err(RtuParseError::ByteCountMismatch { .. })
        ));
    }

    #[test]
    fn test_bits_extraction() {
        // 10 inputs over 2 bytes: 0xB5 = 1,0,1,0,1,1,0,1 LSB-first
        let response = RtuResponse {
            unit_id: 1,
            function: 0x02,
            data: vec![0x02, 0xB5, 0x02],
        };
        let bits = response.bits(10).unwrap();
        assert_eq!(bits.len(), 10);
        assert_eq!(
            bits,
            vec![true, false, true, false, true, true, false, true, false, true]
        );
    }

    #[test]
    fn test_bits_byte_count_mismatch() {
        let response = RtuResponse {
            unit_id: 1,
            function: 0x01,
            data: vec![0x01, 0xFF],
        };
        // 10 coils need 2 bytes, only 1 declared
        assert!(matches!(
            response.bits(10),
            Err(RtuParseError::ByteCountMismatch { .. })
        ));
    }

    // ========================================================================
    // Exception Description Tests
    // ========================================================================

    #[test]
    fn test_exception_descriptions() {
        assert_eq!(exception_description(0x02), "Illegal Data Address");
        assert_eq!(exception_description(0x0B), "Gateway Target Device Failed to Respond");
        assert_eq!(exception_description(0x7F), "Unknown Exception");
    }
}
