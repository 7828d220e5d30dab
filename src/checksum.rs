//! CRC-16 frame checksum
//!
//! The reader uses CRC-16/MCRF4XX: reflected polynomial `0x8408`, initial
//! value `0xFFFF`, no final XOR. The checksum covers every byte from the
//! length field through the end of the data and is transmitted low byte first.

use crate::error::UhfError;

const PRESET: u16 = 0xFFFF;
const POLYNOMIAL: u16 = 0x8408;

/// Compute the frame checksum over `data`
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(PRESET, |mut crc, &byte| {
        crc ^= byte as u16;
        for _ in 0..8 {
            crc = if crc & 0x0001 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
        }
        crc
    })
}

/// Append the checksum of `frame` to it, low byte first
pub fn append(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check the trailing two checksum bytes of a complete frame.
///
/// Both byte orders are accepted since some firmware revisions emit the
/// checksum high byte first.
pub fn verify(frame: &[u8]) -> bool {
    check(frame).is_ok()
}

/// Like [`verify`], but reports what was computed and what was received
pub fn check(frame: &[u8]) -> Result<(), UhfError> {
    if frame.len() < 3 {
        return Err(UhfError::MalformedResponse(format!(
            "{} bytes cannot carry a checksum",
            frame.len()
        )));
    }

    let (body, trailer) = frame.split_at(frame.len() - 2);
    let computed = crc16(body);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);

    if received == computed || received.swap_bytes() == computed {
        Ok(())
    } else {
        Err(UhfError::ChecksumMismatch { computed, received })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0x6F91);
    }

    #[test]
    fn test_crc16_inventory_command() {
        assert_eq!(crc16(&[0x04, 0xFF, 0x01]).to_le_bytes(), [0x1B, 0xB4]);
    }

    #[test]
    fn test_verify_captured_inventory_reply() {
        let frame = [0x0B, 0x00, 0x01, 0x01, 0x01, 0x04, 0x00, 0x00, 0x00, 0x02, 0x84, 0x95];
        assert!(verify(&frame));
    }

    #[test]
    fn test_verify_accepts_swapped_byte_order() {
        let frame = [0x0B, 0x00, 0x01, 0x01, 0x01, 0x04, 0x00, 0x00, 0x00, 0x02, 0x95, 0x84];
        assert!(verify(&frame));
    }

    #[test]
    fn test_append_then_verify() {
        for body in [
            vec![0x04, 0x00, 0x01],
            vec![0x05, 0x00, 0x01, 0xFB],
            vec![0x05, 0xFF, 0x2F, 0x1E],
            vec![0x0A, 0x00, 0x01, 0x01, 0x04, 0xE2, 0x00, 0x34, 0x12],
        ] {
            let mut frame = body.clone();
            append(&mut frame);
            assert_eq!(frame.len(), body.len() + 2);
            assert!(verify(&frame), "{:02X?}", frame);
        }
    }

    #[test]
    fn test_check_reports_mismatch() {
        let frame = [0x05, 0x00, 0x01, 0xFB, 0x00, 0x00];
        assert_eq!(
            check(&frame),
            Err(UhfError::ChecksumMismatch {
                computed: 0x3DF2,
                received: 0x0000
            })
        );
    }

    #[test]
    fn test_single_bit_flip_is_detected() {
        let mut frame = vec![0x05, 0x00, 0x2F, 0x00];
        append(&mut frame);
        frame[3] ^= 0x01;
        assert!(!verify(&frame));
    }

    #[test]
    fn test_too_short_is_never_valid() {
        assert!(!verify(&[]));
        assert!(!verify(&[0xFF, 0xFF]));
    }
}
