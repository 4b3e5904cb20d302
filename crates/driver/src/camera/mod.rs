//! Camera control protocol and sub-device lifecycle
//!
//! - [`client`]: bracketed GET/SET requests for brightness, contrast and hue
//! - [`framework`]: capability traits and the video node registry
//! - [`subdevice`]: probing and teardown of the control and streaming halves

pub mod client;
pub mod framework;
pub mod subdevice;

pub use client::{ClientSettings, ControlClient};
pub use framework::{
    SupportsCapability, SupportsControl, SupportsFormat, VideoFramework, VideoNode, VideoRegistry,
};
pub use subdevice::{
    AttachedCamera, ControlDevice, ControlSubDevice, DeviceDescriptors, InterfaceLayout,
    ProbeSettings, StreamingSubDevice, probe_camera,
};
