//! Heart Rate Measurement Protocol
//!
//! Decoding of the standard Heart Rate Measurement characteristic (0x2A37).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Heart Rate Measurement Characteristic UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: &str = "00002a37-0000-1000-8000-00805f9b34fb";

/// Flags bit 0: heart rate value is UINT16 instead of UINT8
pub const FLAG_HR_FORMAT_UINT16: u8 = 0x01;

/// How the bpm value is read out of a notification frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BpmEncoding {
    /// Always read `frame[1]` as UINT8, whatever the flags byte says
    #[default]
    Uint8,
    /// Honor flags bit 0 and read UINT16 little-endian when it is set
    FlagAware,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Frame too short: {len} bytes, need {needed}")]
    TooShort { len: usize, needed: usize },
}

/// Decoded notification frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateMeasurement {
    pub flags: u8,
    pub bpm: u16,
}

impl HeartRateMeasurement {
    /// The device declared a 16-bit value in the flags byte.
    pub fn declares_uint16(&self) -> bool {
        self.flags & FLAG_HR_FORMAT_UINT16 != 0
    }
}

/// Parse a Heart Rate Measurement notification
///
/// # Frame Structure
///
/// ```text
/// [0]     : Flags
///           bit 0: heart rate value format (0 = UINT8, 1 = UINT16)
///           bit 1-2: sensor contact status
///           bit 3: energy expended present
///           bit 4: RR-interval present
/// [1]     : Heart rate (UINT8)
/// [1-2]   : Heart rate (UINT16 little-endian) when flags bit 0 is set
/// [..]    : Optional energy expended / RR-intervals (ignored)
/// ```
pub fn parse_measurement(
    frame: &[u8],
    encoding: BpmEncoding,
) -> Result<HeartRateMeasurement, ParseError> {
    if frame.len() < 2 {
        return Err(ParseError::TooShort {
            len: frame.len(),
            needed: 2,
        });
    }

    let flags = frame[0];
    let bpm = match encoding {
        BpmEncoding::Uint8 => frame[1] as u16,
        BpmEncoding::FlagAware if flags & FLAG_HR_FORMAT_UINT16 != 0 => {
            if frame.len() < 3 {
                return Err(ParseError::TooShort {
                    len: frame.len(),
                    needed: 3,
                });
            }
            u16::from_le_bytes([frame[1], frame[2]])
        }
        BpmEncoding::FlagAware => frame[1] as u16,
    };

    Ok(HeartRateMeasurement { flags, bpm })
}

/// Parse a UUID string from settings
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid, uuid::Error> {
    Uuid::parse_str(uuid_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid() {
        let uuid = parse_uuid(HEART_RATE_MEASUREMENT_UUID).unwrap();
        assert_eq!(uuid.as_fields().0, 0x0000_2a37);
    }

    #[test]
    fn test_every_uint8_value_decodes() {
        for b in 0..=u8::MAX {
            let m = parse_measurement(&[0x00, b], BpmEncoding::Uint8).unwrap();
            assert_eq!(m.bpm, b as u16);
        }
    }

    #[test]
    fn test_uint8_ignores_format_flag() {
        // Trailing RR-interval bytes are ignored too.
        let m = parse_measurement(&[0x11, 0x48, 0x01, 0x20, 0x03], BpmEncoding::Uint8).unwrap();
        assert_eq!(m.bpm, 72);
        assert!(m.declares_uint16());
    }

    #[test]
    fn test_flag_aware_reads_uint16() {
        let m = parse_measurement(&[0x01, 0x2c, 0x01], BpmEncoding::FlagAware).unwrap();
        assert_eq!(m.bpm, 300);

        let m = parse_measurement(&[0x06, 0x48], BpmEncoding::FlagAware).unwrap();
        assert_eq!(m.bpm, 72);
        assert!(!m.declares_uint16());
    }

    #[test]
    fn test_short_frames_rejected() {
        assert_eq!(
            parse_measurement(&[0x00], BpmEncoding::Uint8),
            Err(ParseError::TooShort { len: 1, needed: 2 })
        );
        assert_eq!(
            parse_measurement(&[0x01, 0x48], BpmEncoding::FlagAware),
            Err(ParseError::TooShort { len: 2, needed: 3 })
        );
        assert!(parse_measurement(&[], BpmEncoding::Uint8).is_err());
    }
}
