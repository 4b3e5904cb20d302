//! Metadata handed to the video framework
//!
//! The capture device offers exactly one pixel format: YUYV 4:2:2 interleaved at
//! 1280x720. Capability and queue metadata are fixed for the device family.

use serde::{Deserialize, Serialize};

/// Build a little-endian fourcc code
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

pub const PIXEL_FORMAT_YUYV: u32 = fourcc(b"YUYV");

/// Capability flags reported to the framework
pub mod caps {
    pub const VIDEO_CAPTURE: u32 = 0x0000_0001;
    pub const AUDIO: u32 = 0x0002_0000;
    pub const READWRITE: u32 = 0x0100_0000;
    pub const STREAMING: u32 = 0x0400_0000;
    pub const DEVICE_CAPS: u32 = 0x8000_0000;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldOrder {
    None,
    Interlaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Colorspace {
    Smpte170m,
    Rec709,
    Srgb,
}

/// Single-plane pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
    pub field: FieldOrder,
    pub bytes_per_line: u32,
    pub size_image: u32,
    pub colorspace: Colorspace,
}

impl PixelFormat {
    pub const fn yuyv_720p() -> Self {
        Self {
            width: 1280,
            height: 720,
            pixel_format: PIXEL_FORMAT_YUYV,
            field: FieldOrder::None,
            bytes_per_line: 1280 * 2,
            size_image: 1280 * 720 * 2,
            colorspace: Colorspace::Smpte170m,
        }
    }

    pub fn fourcc_str(&self) -> String {
        self.pixel_format
            .to_le_bytes()
            .iter()
            .map(|b| if b.is_ascii_graphic() { *b as char } else { '.' })
            .collect()
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::yuyv_720p()
    }
}

/// Driver identity and capability flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub version: u32,
    /// Capabilities of the physical device as a whole
    pub capabilities: u32,
    /// Capabilities of this node
    pub device_caps: u32,
}

impl CapabilityInfo {
    pub const DRIVER_NAME: &'static str = "uvc-cam";
    pub const CARD_NAME: &'static str = "Generic Web Cam";

    pub fn for_bus(bus_number: u8, device_address: u8) -> Self {
        let device_caps = caps::VIDEO_CAPTURE | caps::READWRITE | caps::AUDIO | caps::STREAMING;
        Self {
            driver: Self::DRIVER_NAME.to_string(),
            card: Self::CARD_NAME.to_string(),
            bus_info: format!("usb-{}-{}", bus_number, device_address),
            version: driver_version(1, 2, 3),
            capabilities: device_caps | caps::DEVICE_CAPS,
            device_caps,
        }
    }
}

pub const fn driver_version(major: u32, minor: u32, patch: u32) -> u32 {
    (major << 16) | (minor << 8) | patch
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoMode {
    Mmap,
    Read,
}

/// Buffer queue metadata
///
/// Buffer transfer itself is not implemented by this driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub io_modes: Vec<IoMode>,
    pub min_buffers_needed: u32,
    pub monotonic_timestamps: bool,
}

impl Default for QueueInfo {
    fn default() -> Self {
        Self {
            io_modes: vec![IoMode::Mmap, IoMode::Read],
            min_buffers_needed: 2,
            monotonic_timestamps: true,
        }
    }
}
