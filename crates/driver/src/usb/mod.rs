//! USB subsystem
//!
//! Device enumeration, the rusb-backed control transport and the dedicated
//! worker thread that owns every attached camera.
//!
//! Device I/O is blocking and runs on the worker thread, away from the Tokio
//! runtime; the two sides talk through the channel bridge in `common`.

pub mod device;
pub mod manager;
pub mod transfers;
pub mod worker;

pub use device::UsbDevice;
pub use manager::DeviceManager;
pub use transfers::RusbTransport;
pub use worker::{CameraWorkerThread, spawn_camera_worker};
