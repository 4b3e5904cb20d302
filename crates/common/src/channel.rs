//! Async channel bridge between Tokio runtime and the camera thread

use async_channel::{Receiver, Sender, bounded};
use protocol::{
    CameraControl, CameraError, CameraInfo, ControlInfo, DescriptorForest, DeviceLocation,
    DeviceSummary, SetOutcome, StreamState,
};
use tokio::sync::oneshot;
use tracing::{trace, warn};

/// Reply channel carried by every request
pub type Reply<T> = oneshot::Sender<Result<T, CameraError>>;

/// Commands from Tokio runtime to the camera thread
#[derive(Debug)]
pub enum CameraCommand {
    /// List connected cameras matching the configured vendor/product
    ListDevices {
        response: Reply<Vec<DeviceSummary>>,
    },

    /// Open and probe a camera
    Attach {
        /// Bus position, or `None` for the first matching camera
        location: Option<DeviceLocation>,
        response: Reply<CameraInfo>,
    },

    /// Descriptor forest parsed at attach
    Describe {
        location: DeviceLocation,
        response: Reply<DescriptorForest>,
    },

    /// Supported controls with their factory ranges
    Controls {
        location: DeviceLocation,
        response: Reply<Vec<ControlInfo>>,
    },

    /// Read the current value of a control
    GetControl {
        location: DeviceLocation,
        control: CameraControl,
        response: Reply<i32>,
    },

    /// Write a control value
    SetControl {
        location: DeviceLocation,
        control: CameraControl,
        value: i32,
        response: Reply<SetOutcome>,
    },

    /// Tear down a camera's sub-devices and release the handle
    Detach {
        location: DeviceLocation,
        response: Reply<()>,
    },

    /// Shutdown the camera thread gracefully
    Shutdown,
}

/// Events from the camera thread
#[derive(Debug, Clone)]
pub enum CameraEvent {
    /// Both sub-devices probed and registered
    Attached { info: CameraInfo },

    /// Camera torn down
    Detached { location: DeviceLocation },

    /// A bracketed operation left streaming in a different state
    StreamStateChanged {
        location: DeviceLocation,
        state: StreamState,
    },
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct CameraBridge {
    cmd_tx: Sender<CameraCommand>,
    event_rx: Receiver<CameraEvent>,
}

impl CameraBridge {
    /// Send a command to the camera thread
    pub async fn send_command(&self, cmd: CameraCommand) -> crate::Result<()> {
        trace!("Sending command to camera thread: {:?}", cmd);
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command built around a fresh reply channel and await the answer
    pub async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> CameraCommand,
    ) -> crate::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send_command(build(tx)).await?;
        let result = rx
            .await
            .map_err(|e| crate::Error::Channel(format!("camera thread dropped reply: {}", e)))?;
        Ok(result?)
    }

    /// Receive an event from the camera thread
    pub async fn recv_event(&self) -> crate::Result<CameraEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Take an event if one is queued
    pub fn try_recv_event(&self) -> Option<CameraEvent> {
        self.event_rx.try_recv().ok()
    }
}

/// Handle for the camera thread (blocking)
pub struct CameraWorker {
    pub(crate) cmd_rx: Receiver<CameraCommand>,
    pub event_tx: Sender<CameraEvent>,
}

impl CameraWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<CameraCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<CameraCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Queue an event without blocking; fails if the queue is full or closed
    pub fn send_event(&self, event: CameraEvent) -> crate::Result<()> {
        self.event_tx.try_send(event).map_err(|e| {
            warn!("Dropping camera event: {}", e);
            crate::Error::Channel(e.to_string())
        })
    }
}

/// Create the channel bridge between Tokio and the camera thread
///
/// Returns (CameraBridge for Tokio, CameraWorker for the camera thread)
pub fn create_camera_bridge() -> (CameraBridge, CameraWorker) {
    let (cmd_tx, cmd_rx) = bounded(64);
    let (event_tx, event_rx) = bounded(64);

    (
        CameraBridge { cmd_tx, event_rx },
        CameraWorker { cmd_rx, event_tx },
    )
}
