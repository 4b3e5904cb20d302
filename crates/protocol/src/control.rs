//! Camera control capability, ranges and value codec

use crate::descriptor::DescriptorForest;
use crate::error::RangeError;
use crate::types::{CameraControl, vc_subtype};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Which image controls the processing unit advertises
///
/// Computed once at attach from the processing unit's `bmControls` bitmap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCapability {
    pub brightness: bool,
    pub contrast: bool,
    pub hue: bool,
}

impl ControlCapability {
    pub fn from_bitmap(bitmap: u16) -> Self {
        Self {
            brightness: bitmap & CameraControl::Brightness.capability_bit() != 0,
            contrast: bitmap & CameraControl::Contrast.capability_bit() != 0,
            hue: bitmap & CameraControl::Hue.capability_bit() != 0,
        }
    }

    /// Read the bitmap of the first processing unit under `control_interface`
    ///
    /// A missing or too-short processing unit record means no control is
    /// supported.
    pub fn from_forest(forest: &DescriptorForest, control_interface: u8) -> Self {
        forest
            .video_interfaces_for(control_interface, vc_subtype::PROCESSING_UNIT)
            .next()
            .and_then(|pu| pu.processing_unit_controls())
            .map(Self::from_bitmap)
            .unwrap_or_default()
    }

    pub fn supports(&self, control: CameraControl) -> bool {
        match control {
            CameraControl::Brightness => self.brightness,
            CameraControl::Contrast => self.contrast,
            CameraControl::Hue => self.hue,
        }
    }

    pub fn supported(&self) -> impl Iterator<Item = CameraControl> + '_ {
        CameraControl::ALL.into_iter().filter(|c| self.supports(*c))
    }
}

/// Factory range of one control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRange {
    pub min: i32,
    pub max: i32,
    pub step: i32,
    pub default: i32,
}

impl ControlRange {
    /// Decode the four GET_MIN/MAX/RES/DEF answers and check the ordering
    pub fn from_raw(min: &[u8], max: &[u8], step: &[u8], default: &[u8]) -> Result<Self, RangeError> {
        let range = Self {
            min: decode_value(min)?,
            max: decode_value(max)?,
            step: decode_value(step)?,
            default: decode_value(default)?,
        };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), RangeError> {
        if !(self.min <= self.default && self.default <= self.max) {
            return Err(RangeError::OrderViolation {
                min: self.min,
                max: self.max,
                default: self.default,
            });
        }
        if self.step < 1 {
            return Err(RangeError::ZeroStep { step: self.step });
        }
        Ok(())
    }

    pub fn contains(&self, value: i32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Decode a signed little-endian control value of 1 or 2 bytes
pub fn decode_value(bytes: &[u8]) -> Result<i32, RangeError> {
    match bytes.len() {
        1 => Ok(i32::from(bytes[0] as i8)),
        2 => Ok(i32::from(LittleEndian::read_i16(bytes))),
        width => Err(RangeError::BadWidth { width }),
    }
}

/// Encode `value` as a signed little-endian control value of `width` bytes
pub fn encode_value(value: i32, width: usize) -> Result<Vec<u8>, RangeError> {
    match width {
        1 => i8::try_from(value)
            .map(|v| vec![v as u8])
            .map_err(|_| RangeError::Unrepresentable { value, width }),
        2 => {
            let v = i16::try_from(value).map_err(|_| RangeError::Unrepresentable { value, width })?;
            let mut buf = vec![0u8; 2];
            LittleEndian::write_i16(&mut buf, v);
            Ok(buf)
        }
        width => Err(RangeError::BadWidth { width }),
    }
}

/// Result of one Set bracket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOutcome {
    pub control: CameraControl,
    pub requested: i32,
    /// Value read before the write
    pub previous: i32,
    /// Value read back after the write; may differ if the device clamps
    pub current: i32,
}

impl SetOutcome {
    pub fn applied(&self) -> bool {
        self.requested == self.current
    }
}

/// A supported control with its factory range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlInfo {
    pub control: CameraControl,
    pub range: ControlRange,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_flags() {
        let caps = ControlCapability::from_bitmap(0x0001);
        assert!(caps.brightness);
        assert!(!caps.contrast);
        assert!(!caps.hue);

        let caps = ControlCapability::from_bitmap(0x0007);
        assert_eq!(caps.supported().count(), 3);
    }

    #[test]
    fn test_decode_value() {
        assert_eq!(decode_value(&[0xEC, 0xFF]), Ok(-20));
        assert_eq!(decode_value(&[0x14, 0x00]), Ok(20));
        assert_eq!(decode_value(&[0xFF]), Ok(-1));
        assert_eq!(decode_value(&[]), Err(RangeError::BadWidth { width: 0 }));
    }

    #[test]
    fn test_encode_value() {
        assert_eq!(encode_value(-20, 2).unwrap(), vec![0xEC, 0xFF]);
        assert_eq!(encode_value(127, 1).unwrap(), vec![0x7F]);
        assert_eq!(
            encode_value(128, 1),
            Err(RangeError::Unrepresentable { value: 128, width: 1 })
        );
        assert!(encode_value(40000, 2).is_err());
    }

    #[test]
    fn test_range_validation() {
        let range = ControlRange::from_raw(&[0xEC, 0xFF], &[0x14, 0x00], &[0x01, 0x00], &[0x00, 0x00])
            .unwrap();
        assert_eq!(
            range,
            ControlRange {
                min: -20,
                max: 20,
                step: 1,
                default: 0
            }
        );

        let bad = ControlRange {
            min: 10,
            max: 0,
            step: 1,
            default: 5,
        };
        assert!(matches!(bad.validate(), Err(RangeError::OrderViolation { .. })));

        let bad = ControlRange {
            min: 0,
            max: 10,
            step: 0,
            default: 5,
        };
        assert_eq!(bad.validate(), Err(RangeError::ZeroStep { step: 0 }));
    }
}
