//! Common utilities for uvc-cam
//!
//! This crate provides the pieces shared by the driver library and its
//! front-ends: error handling, logging setup, the async channel bridge to the
//! blocking camera thread, and test utilities including a simulated camera.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{CameraBridge, CameraCommand, CameraEvent, CameraWorker, create_camera_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
