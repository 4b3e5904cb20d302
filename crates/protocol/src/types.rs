//! Wire constants and shared types
//!
//! Request codes, descriptor tags and selectors used by the camera's control
//! channel, plus the small value types passed between the driver and its
//! front-ends.

use crate::control::ControlCapability;
use crate::descriptor::StreamingSelection;
use crate::format::{CapabilityInfo, PixelFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Standard request codes
pub mod request {
    pub const GET_DESCRIPTOR: u8 = 0x06;
    pub const SET_INTERFACE: u8 = 0x0B;
}

/// Video class request codes
pub mod class_request {
    pub const SET_CUR: u8 = 0x01;
    pub const GET_CUR: u8 = 0x81;
    pub const GET_MIN: u8 = 0x82;
    pub const GET_MAX: u8 = 0x83;
    pub const GET_RES: u8 = 0x84;
    pub const GET_LEN: u8 = 0x85;
    pub const GET_INFO: u8 = 0x86;
    pub const GET_DEF: u8 = 0x87;
}

/// Descriptor type tags
pub mod descriptor_type {
    pub const DEVICE: u8 = 0x01;
    pub const CONFIGURATION: u8 = 0x02;
    pub const STRING: u8 = 0x03;
    pub const INTERFACE: u8 = 0x04;
    pub const ENDPOINT: u8 = 0x05;
    pub const INTERFACE_ASSOCIATION: u8 = 0x0B;
    /// Class-specific interface
    pub const VIDEO_INTERFACE: u8 = 0x24;
    /// Class-specific endpoint
    pub const VIDEO_ENDPOINT: u8 = 0x25;
}

/// Video control interface descriptor subtypes
pub mod vc_subtype {
    pub const HEADER: u8 = 0x01;
    pub const INPUT_TERMINAL: u8 = 0x02;
    pub const OUTPUT_TERMINAL: u8 = 0x03;
    pub const SELECTOR_UNIT: u8 = 0x04;
    pub const PROCESSING_UNIT: u8 = 0x05;
    pub const EXTENSION_UNIT: u8 = 0x06;
}

/// Video streaming interface descriptor subtypes
pub mod vs_subtype {
    pub const INPUT_HEADER: u8 = 0x01;
    pub const FORMAT_UNCOMPRESSED: u8 = 0x04;
    pub const FRAME_UNCOMPRESSED: u8 = 0x05;
    pub const COLORFORMAT: u8 = 0x0D;
}

/// Alternate setting values used to gate streaming
pub const ZERO_BANDWIDTH_ALT_SETTING: u16 = 0;
pub const OPERATIONAL_ALT_SETTING: u16 = 1;

/// Length of a standard device descriptor
pub const DEVICE_DESCRIPTOR_LEN: usize = 18;

/// Length of the fixed configuration descriptor header
pub const CONFIGURATION_HEADER_LEN: usize = 9;

/// Default timeout for every control transfer
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Largest isochronous packet size observed for this camera family
pub const DEFAULT_ISO_PACKET_SIZE: u16 = 1023;

/// Vendor/product pair of the supported camera
pub const CAMERA_VENDOR_ID: u16 = 0x1E4E;
pub const CAMERA_PRODUCT_ID: u16 = 0x0109;

/// Adjustable camera parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraControl {
    Brightness,
    Contrast,
    Hue,
}

impl CameraControl {
    pub const ALL: [CameraControl; 3] = [
        CameraControl::Brightness,
        CameraControl::Contrast,
        CameraControl::Hue,
    ];

    /// Control selector, already shifted into the high byte of `wValue`
    pub const fn selector(self) -> u16 {
        match self {
            CameraControl::Brightness => 0x0200,
            CameraControl::Contrast => 0x0300,
            CameraControl::Hue => 0x0600,
        }
    }

    /// Size of the control's value on the wire
    pub const fn wire_width(self) -> usize {
        match self {
            CameraControl::Brightness | CameraControl::Contrast | CameraControl::Hue => 2,
        }
    }

    /// Bit in the processing unit's `bmControls` bitmap
    pub const fn capability_bit(self) -> u16 {
        match self {
            CameraControl::Brightness => 0x0001,
            CameraControl::Contrast => 0x0002,
            CameraControl::Hue => 0x0004,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            CameraControl::Brightness => "brightness",
            CameraControl::Contrast => "contrast",
            CameraControl::Hue => "hue",
        }
    }
}

impl fmt::Display for CameraControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CameraControl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brightness" => Ok(CameraControl::Brightness),
            "contrast" => Ok(CameraControl::Contrast),
            "hue" => Ok(CameraControl::Hue),
            other => Err(format!(
                "unknown control '{}', expected brightness, contrast or hue",
                other
            )),
        }
    }
}

/// Which half of the camera a USB interface belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubDeviceKind {
    /// Control channel (single alternate setting)
    Control,
    /// Isochronous video streaming (several alternate settings)
    Streaming,
}

impl SubDeviceKind {
    /// Classify an interface by its number of alternate settings
    pub fn classify(num_alt_settings: usize) -> Self {
        if num_alt_settings > 1 {
            SubDeviceKind::Streaming
        } else {
            SubDeviceKind::Control
        }
    }
}

/// Best known streaming state of the device after a bracketed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    Enabled,
    Disabled,
    /// A stream gate transfer failed, the device may be in either state
    Unknown,
}

/// Lifecycle of a control or streaming sub-device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubDeviceState {
    Unbound,
    Allocated,
    Probing,
    Attached,
    Disconnecting,
    Freed,
}

/// Step of a bracketed control operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BracketStage {
    DisableStream,
    ReadPrevious,
    Write,
    ReadCurrent,
    QueryMin,
    QueryMax,
    QueryResolution,
    QueryDefault,
    ResetDefault,
    EnableStream,
}

impl fmt::Display for BracketStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BracketStage::DisableStream => "disable stream",
            BracketStage::ReadPrevious => "read previous value",
            BracketStage::Write => "write value",
            BracketStage::ReadCurrent => "read current value",
            BracketStage::QueryMin => "query minimum",
            BracketStage::QueryMax => "query maximum",
            BracketStage::QueryResolution => "query resolution",
            BracketStage::QueryDefault => "query default",
            BracketStage::ResetDefault => "reset to default",
            BracketStage::EnableStream => "enable stream",
        };
        f.write_str(s)
    }
}

/// Bus position of a physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceLocation {
    pub bus_number: u8,
    pub device_address: u8,
}

impl fmt::Display for DeviceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}", self.bus_number, self.device_address)
    }
}

impl FromStr for DeviceLocation {
    type Err = String;

    /// Parse `BUS:ADDR` as printed by `Display`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (bus, addr) = s
            .split_once(':')
            .ok_or_else(|| format!("expected BUS:ADDR, got '{}'", s))?;
        let bus_number = bus
            .trim()
            .parse()
            .map_err(|e| format!("invalid bus number '{}': {}", bus, e))?;
        let device_address = addr
            .trim()
            .parse()
            .map_err(|e| format!("invalid device address '{}': {}", addr, e))?;
        Ok(Self {
            bus_number,
            device_address,
        })
    }
}

/// A camera found during enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub bus_number: u8,
    pub device_address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceSummary {
    pub fn location(&self) -> DeviceLocation {
        DeviceLocation {
            bus_number: self.bus_number,
            device_address: self.device_address,
        }
    }
}

/// Everything known about an attached camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub summary: DeviceSummary,
    /// Node name assigned by the video framework, e.g. `video0`
    pub node: String,
    pub capability: ControlCapability,
    pub capability_info: CapabilityInfo,
    pub format: PixelFormat,
    /// Alternate setting selected by the streaming sub-device
    pub streaming: Option<StreamingSelection>,
}

/// Vendor/product pair decoded from a device descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    /// Decode from a raw device descriptor; `None` if it is too short
    pub fn from_device_descriptor(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 12 {
            return None;
        }
        Some(Self {
            vendor_id: u16::from(bytes[8]) | u16::from(bytes[9]) << 8,
            product_id: u16::from(bytes[10]) | u16::from(bytes[11]) << 8,
        })
    }
}
