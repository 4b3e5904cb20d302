//! uvc-cam driver
//!
//! Attaches to a USB video camera over libusb, parses its configuration
//! descriptor, and reads and writes the brightness, contrast and hue controls.
//!
//! - [`usb`]: device discovery, the rusb control transport and the worker thread
//! - [`camera`]: the control protocol client and the sub-device lifecycle
//! - [`config`]: TOML configuration

pub mod camera;
pub mod config;
pub mod usb;
