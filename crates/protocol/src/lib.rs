//! Protocol library for uvc-cam
//!
//! This crate holds everything about talking to the camera that does not touch
//! real hardware: the control transfer contract, the configuration descriptor
//! parser, the control value codec and the metadata handed to the video
//! framework.
//!
//! # Example
//!
//! ```
//! use protocol::{ControlCapability, DescriptorBlobBuilder, DescriptorForest};
//!
//! let blob = DescriptorBlobBuilder::new()
//!     .configuration(1, 1)
//!     .interface(0, 0, 0, 0x0E, 0x01)
//!     .video_interface(0x05, &[2, 1, 0, 0, 2, 0x03, 0x00, 0])
//!     .build();
//!
//! let forest = DescriptorForest::parse(&blob).unwrap();
//! let caps = ControlCapability::from_forest(&forest, 0);
//! assert!(caps.brightness && caps.contrast && !caps.hue);
//! ```

pub mod builder;
pub mod control;
pub mod descriptor;
pub mod error;
pub mod format;
pub mod transport;
pub mod types;

pub use builder::{DescriptorBlobBuilder, device_descriptor};
pub use control::{
    ControlCapability, ControlInfo, ControlRange, SetOutcome, decode_value, encode_value,
};
pub use descriptor::{
    ConfigurationRecord, DescriptorForest, EndpointRecord, InterfaceRecord, RecordCounts,
    RecordKind, RecordWalker, StreamingSelection, TransferKind, VideoInterfaceRecord,
};
pub use error::{CameraError, LookupError, ParseError, RangeError, Result};
pub use format::{CapabilityInfo, Colorspace, FieldOrder, IoMode, PixelFormat, QueueInfo};
pub use transport::{
    ControlSetup, ControlTransport, Direction, MAX_TIMEOUT_MS, Recipient, RequestKind,
    TransportError, check_timeout,
};
pub use types::{
    BracketStage, CameraControl, CameraInfo, DeviceIdentity, DeviceLocation, DeviceSummary,
    StreamState, SubDeviceKind, SubDeviceState,
};
