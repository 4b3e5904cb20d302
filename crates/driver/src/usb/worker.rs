//! Camera worker thread
//!
//! Dedicated blocking thread that owns the device manager. Every request from
//! the Tokio runtime is handled here one at a time, so a stream bracket on a
//! device is never interleaved with another request to it.

use crate::camera::{ProbeSettings, VideoRegistry};
use crate::usb::manager::DeviceManager;
use common::{CameraCommand, CameraEvent, CameraWorker};
use protocol::{DeviceLocation, StreamState};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Camera worker thread
///
/// Processes commands from the Tokio runtime and sends events back.
pub struct CameraWorkerThread {
    /// Device manager for USB operations
    manager: DeviceManager,
    /// Communication channel with Tokio runtime
    worker: CameraWorker,
}

impl CameraWorkerThread {
    /// Create a new camera worker
    pub fn new(
        worker: CameraWorker,
        filters: Vec<String>,
        settings: ProbeSettings,
    ) -> Result<Self, rusb::Error> {
        let manager = DeviceManager::new(filters, settings, Arc::new(VideoRegistry::new()))?;
        Ok(Self { manager, worker })
    }

    /// Run until a Shutdown command arrives or the bridge is dropped
    ///
    /// Attached cameras are detached on the way out.
    pub fn run(mut self) -> Result<(), rusb::Error> {
        info!("Camera worker thread started");

        loop {
            match self.worker.recv_command() {
                Ok(CameraCommand::Shutdown) => {
                    info!("Camera worker shutting down");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => {
                    debug!("Command channel closed: {}", e);
                    break;
                }
            }
        }

        self.manager.detach_all();
        info!("Camera worker thread stopped");
        Ok(())
    }

    /// Handle a command from the Tokio runtime
    fn handle_command(&mut self, cmd: CameraCommand) {
        // Keep the worker alive if a handler panics; the dropped reply tells the caller
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in camera command handler: {:?}", e);
        }
    }

    /// Inner command handler (can panic, caught by handle_command)
    fn handle_command_inner(&mut self, cmd: CameraCommand) {
        match cmd {
            CameraCommand::ListDevices { response } => {
                let result = self.manager.list_devices();
                let _ = response.send(result);
            }

            CameraCommand::Attach { location, response } => {
                debug!("Attaching camera {:?}", location);
                let result = self.manager.attach(location);
                if let Ok(info) = &result {
                    self.emit(CameraEvent::Attached { info: info.clone() });
                }
                let _ = response.send(result);
            }

            CameraCommand::Describe { location, response } => {
                let _ = response.send(self.manager.describe(location));
            }

            CameraCommand::Controls { location, response } => {
                let result = self.manager.controls(location);
                self.report_stream_state(location);
                let _ = response.send(result);
            }

            CameraCommand::GetControl {
                location,
                control,
                response,
            } => {
                debug!("Get {} on {}", control, location);
                let result = self.manager.get(location, control);
                self.report_stream_state(location);
                let _ = response.send(result);
            }

            CameraCommand::SetControl {
                location,
                control,
                value,
                response,
            } => {
                debug!("Set {} = {} on {}", control, value, location);
                let result = self.manager.set(location, control, value);
                self.report_stream_state(location);
                let _ = response.send(result);
            }

            CameraCommand::Detach { location, response } => {
                let result = self.manager.detach(location);
                if result.is_ok() {
                    self.emit(CameraEvent::Detached { location });
                }
                let _ = response.send(result);
            }

            CameraCommand::Shutdown => {
                // Handled in run loop
            }
        }
    }

    /// Tell the front-end when a bracket left streaming off or undefined
    fn report_stream_state(&self, location: DeviceLocation) {
        if let Ok(state) = self.manager.stream_state(location)
            && state != StreamState::Enabled
        {
            self.emit(CameraEvent::StreamStateChanged { location, state });
        }
    }

    fn emit(&self, event: CameraEvent) {
        if let Err(e) = self.worker.send_event(event) {
            debug!("Dropping camera event: {}", e);
        }
    }
}

/// Spawn the camera worker thread
///
/// Returns a join handle for the worker thread.
pub fn spawn_camera_worker(
    worker: CameraWorker,
    filters: Vec<String>,
    settings: ProbeSettings,
) -> std::thread::JoinHandle<Result<(), rusb::Error>> {
    std::thread::Builder::new()
        .name("camera-worker".to_string())
        .spawn(move || {
            let worker_thread = CameraWorkerThread::new(worker, filters, settings)?;
            worker_thread.run()
        })
        .expect("Failed to spawn camera worker thread")
}
