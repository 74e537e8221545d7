//! Heart Rate Measurement (0x2A37) payload codec.
//!
//! The peripheral only ever emits the minimal form: a zero flags byte followed
//! by an 8-bit heart rate. The parser accepts the full flags layout so the
//! validation client can decode any compliant sensor.

use crate::error::{Error, Result};
use crate::utils::clamp_bpm;

/// Flags bit 0: heart rate value is a little-endian u16.
pub const FLAG_VALUE_FORMAT_U16: u8 = 0x01;
/// Flags bit 1: skin contact detected.
pub const FLAG_SENSOR_CONTACT_DETECTED: u8 = 0x02;
/// Flags bit 2: sensor contact feature supported.
pub const FLAG_SENSOR_CONTACT_SUPPORTED: u8 = 0x04;
/// Flags bit 3: energy expended field present.
pub const FLAG_ENERGY_EXPENDED_PRESENT: u8 = 0x08;
/// Flags bit 4: one or more RR-interval fields present.
pub const FLAG_RR_INTERVALS_PRESENT: u8 = 0x10;

/// Encode an 8-bit heart rate as a measurement payload.
///
/// # Example
///
/// ```
/// use hr_peripheral::protocol::heart_rate::encode;
///
/// assert_eq!(encode(72), [0x00, 72]);
/// ```
#[inline]
pub fn encode(bpm: u8) -> [u8; 2] {
    [0x00, bpm]
}

/// Encode an unbounded heart rate, clamping it into `[0, 255]` first.
#[inline]
pub fn encode_clamped(bpm: i32) -> [u8; 2] {
    encode(clamp_bpm(bpm))
}

/// Sensor contact status carried in flags bits 1-2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensorContact {
    /// The sensor does not report contact.
    NotSupported,
    /// Supported, but no skin contact.
    NotDetected,
    /// Supported and in contact.
    Detected,
}

impl SensorContact {
    fn from_flags(flags: u8) -> Self {
        if flags & FLAG_SENSOR_CONTACT_SUPPORTED == 0 {
            Self::NotSupported
        } else if flags & FLAG_SENSOR_CONTACT_DETECTED != 0 {
            Self::Detected
        } else {
            Self::NotDetected
        }
    }
}

/// Decoded Heart Rate Measurement notification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeartRateMeasurement {
    /// Heart rate in beats per minute.
    pub bpm: u16,
    /// Sensor contact status.
    pub sensor_contact: SensorContact,
    /// Accumulated energy expended in kilojoules, if present.
    pub energy_expended: Option<u16>,
    /// RR intervals in units of 1/1024 s.
    pub rr_intervals: Vec<u16>,
}

impl HeartRateMeasurement {
    /// Parse a measurement payload.
    ///
    /// Layout:
    /// - Byte 0: flags
    /// - Heart rate: u8, or u16 little-endian if flags bit 0 is set
    /// - Energy expended: u16 little-endian, if flags bit 3 is set
    /// - RR intervals: u16 little-endian each, to the end, if flags bit 4 is set
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if the payload is shorter than the
    /// fields its flags announce.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (&flags, rest) = data.split_first().ok_or_else(|| Error::InvalidData {
            context: "Heart rate measurement is empty".to_string(),
        })?;

        let mut cursor = Cursor { data: rest };

        let bpm = if flags & FLAG_VALUE_FORMAT_U16 != 0 {
            cursor.u16("16-bit heart rate value")?
        } else {
            u16::from(cursor.u8("8-bit heart rate value")?)
        };

        let energy_expended = if flags & FLAG_ENERGY_EXPENDED_PRESENT != 0 {
            Some(cursor.u16("energy expended")?)
        } else {
            None
        };

        let mut rr_intervals = Vec::new();
        if flags & FLAG_RR_INTERVALS_PRESENT != 0 {
            while !cursor.data.is_empty() {
                rr_intervals.push(cursor.u16("RR interval")?);
            }
        }

        Ok(Self {
            bpm,
            sensor_contact: SensorContact::from_flags(flags),
            energy_expended,
            rr_intervals,
        })
    }

    /// RR intervals converted to milliseconds.
    pub fn rr_intervals_ms(&self) -> Vec<f64> {
        self.rr_intervals
            .iter()
            .map(|&rr| f64::from(rr) * 1000.0 / 1024.0)
            .collect()
    }
}

struct Cursor<'a> {
    data: &'a [u8],
}

impl Cursor<'_> {
    fn u8(&mut self, field: &str) -> Result<u8> {
        let (&value, rest) = self.data.split_first().ok_or_else(|| truncated(field))?;
        self.data = rest;
        Ok(value)
    }

    fn u16(&mut self, field: &str) -> Result<u16> {
        if self.data.len() < 2 {
            return Err(truncated(field));
        }
        let value = u16::from_le_bytes([self.data[0], self.data[1]]);
        self.data = &self.data[2..];
        Ok(value)
    }
}

fn truncated(field: &str) -> Error {
    Error::InvalidData {
        context: format!("Heart rate measurement truncated: missing {}", field),
    }
}
