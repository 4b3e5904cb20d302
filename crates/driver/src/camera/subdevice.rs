//! Control and streaming sub-devices
//!
//! One physical camera exposes two USB interfaces. The one with a single
//! alternate setting carries control requests; the one with several carries
//! isochronous video. The descriptors are read once per attach; each half is
//! then probed into its own sub-device with private state, so both can be
//! probed and torn down concurrently. Only the control half issues transfers.
//!
//! Teardown runs in reverse order of probing: the framework registration is
//! removed first, then the owned storage is dropped. Storage handed out to
//! in-flight framework requests stays alive until the last holder drops it.

use crate::camera::client::{ClientSettings, ControlClient};
use crate::camera::framework::{
    SupportsCapability, SupportsControl, SupportsFormat, VideoFramework, VideoNode,
    negotiate_format, raw_node_name,
};
use crate::usb::transfers::{fetch_configuration_blob, fetch_device_descriptor};
use protocol::types::{
    CAMERA_PRODUCT_ID, CAMERA_VENDOR_ID, DEFAULT_ISO_PACKET_SIZE, DEFAULT_TIMEOUT_MS,
};
use protocol::{
    CameraControl, CameraError, CameraInfo, CapabilityInfo, ControlCapability, ControlRange,
    ControlTransport, DescriptorForest, DeviceIdentity, DeviceLocation, DeviceSummary,
    PixelFormat, QueueInfo, Result, SetOutcome, StreamState, StreamingSelection, SubDeviceKind,
    SubDeviceState,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything a probe needs to know about the camera family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    pub vendor_id: u16,
    pub product_id: u16,
    pub timeout: Duration,
    pub control_interface: u8,
    pub streaming_interface: u8,
    pub unit_id: u8,
    /// Isochronous packet size the streaming alternate setting must offer
    pub iso_packet_size: u16,
    /// Controls reset to their factory default while probing; every other
    /// supported control only has its range queried
    pub reset_on_probe: Vec<CameraControl>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            vendor_id: CAMERA_VENDOR_ID,
            product_id: CAMERA_PRODUCT_ID,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            control_interface: 0,
            streaming_interface: 1,
            unit_id: 3,
            iso_packet_size: DEFAULT_ISO_PACKET_SIZE,
            reset_on_probe: Vec::new(),
        }
    }
}

impl ProbeSettings {
    fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            timeout: self.timeout,
            unit_id: self.unit_id,
            control_interface: self.control_interface,
            streaming_interface: self.streaming_interface,
        }
    }

    /// Take interface numbers from the device's actual layout when it has one
    pub fn classified(&self, layouts: &[InterfaceLayout]) -> Self {
        let mut settings = self.clone();
        if let Some(control) = layouts.iter().find(|l| l.kind() == SubDeviceKind::Control) {
            settings.control_interface = control.number;
        }
        if let Some(streaming) = layouts.iter().find(|l| l.kind() == SubDeviceKind::Streaming) {
            settings.streaming_interface = streaming.number;
        }
        if settings.control_interface != self.control_interface
            || settings.streaming_interface != self.streaming_interface
        {
            debug!(
                "Interfaces classified as control={}, streaming={}",
                settings.control_interface, settings.streaming_interface
            );
        }
        settings
    }
}

/// Interface number and its count of alternate settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceLayout {
    pub number: u8,
    pub alt_settings: usize,
}

impl InterfaceLayout {
    pub fn kind(&self) -> SubDeviceKind {
        SubDeviceKind::classify(self.alt_settings)
    }
}

fn transition(kind: SubDeviceKind, location: DeviceLocation, state: &mut SubDeviceState, next: SubDeviceState) {
    debug!("{:?} sub-device {}: {:?} -> {:?}", kind, location, state, next);
    *state = next;
}

/// Descriptors read once per attach and shared by both sub-devices
#[derive(Debug, Clone)]
pub struct DeviceDescriptors {
    pub identity: Option<DeviceIdentity>,
    pub forest: Arc<DescriptorForest>,
}

impl DeviceDescriptors {
    /// Verify the device descriptor, then fetch and parse the configuration
    ///
    /// An empty device descriptor read means this is not the control
    /// interface. A VID/PID mismatch is only logged.
    pub fn read<T: ControlTransport>(
        transport: &mut T,
        location: DeviceLocation,
        settings: &ProbeSettings,
    ) -> Result<Self> {
        let descriptor = fetch_device_descriptor(transport, settings.timeout)?;
        if descriptor.is_empty() {
            return Err(CameraError::WrongInterface);
        }

        let identity = DeviceIdentity::from_device_descriptor(&descriptor);
        match identity {
            Some(id) if id.vendor_id != settings.vendor_id || id.product_id != settings.product_id => {
                warn!(
                    "Device {} reports {:04x}:{:04x}, expected {:04x}:{:04x}",
                    location, id.vendor_id, id.product_id, settings.vendor_id, settings.product_id
                );
            }
            Some(id) => debug!("Verified {:04x}:{:04x}", id.vendor_id, id.product_id),
            None => debug!("Device descriptor is {} bytes, identity unknown", descriptor.len()),
        }

        let blob = fetch_configuration_blob(transport, settings.timeout)?;
        let forest = DescriptorForest::parse(&blob)?;
        let counts = forest.counts();
        debug!(
            "Descriptor forest: {} configuration(s), {} interface(s), {} endpoint(s), {} video record(s)",
            counts.configurations, counts.interfaces, counts.endpoints, counts.video_interfaces
        );

        Ok(Self {
            identity,
            forest: Arc::new(forest),
        })
    }
}

/// Control sub-device state shared with the video framework
pub struct ControlDevice<T: ControlTransport> {
    client: Mutex<ControlClient<T>>,
    forest: Arc<DescriptorForest>,
    identity: Option<DeviceIdentity>,
    capability: ControlCapability,
    capability_info: CapabilityInfo,
    format: Mutex<PixelFormat>,
    streaming: Option<StreamingSelection>,
    queue: QueueInfo,
}

impl<T: ControlTransport> ControlDevice<T> {
    fn client(&self) -> MutexGuard<'_, ControlClient<T>> {
        self.client.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn forest(&self) -> &DescriptorForest {
        &self.forest
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
    }

    pub fn capability(&self) -> ControlCapability {
        self.capability
    }

    /// Alternate setting chosen for streaming at probe time
    pub fn streaming(&self) -> Option<StreamingSelection> {
        self.streaming
    }

    pub fn stream_state(&self) -> StreamState {
        self.client().stream_state()
    }

    /// Query a range, optionally resetting the control to its default
    pub fn query_range(&self, control: CameraControl, reset: bool) -> Result<ControlRange> {
        self.client().query_range(control, reset)
    }

    pub fn controls(&self) -> Result<Vec<protocol::ControlInfo>> {
        self.client().controls()
    }
}

impl<T: ControlTransport> SupportsControl for ControlDevice<T> {
    fn supported_controls(&self) -> Vec<CameraControl> {
        self.capability.supported().collect()
    }

    fn control_range(&self, control: CameraControl) -> Result<ControlRange> {
        self.client().range(control)
    }

    fn get_control(&self, control: CameraControl) -> Result<i32> {
        self.client().get(control)
    }

    fn set_control(&self, control: CameraControl, value: i32) -> Result<SetOutcome> {
        self.client().set(control, value)
    }
}

impl<T: ControlTransport> SupportsFormat for ControlDevice<T> {
    fn enum_formats(&self) -> Vec<PixelFormat> {
        vec![PixelFormat::yuyv_720p()]
    }

    fn get_format(&self) -> PixelFormat {
        *self.format.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_format(&self, requested: &PixelFormat) -> Result<PixelFormat> {
        negotiate_format(requested)
    }

    fn set_format(&self, requested: &PixelFormat) -> Result<PixelFormat> {
        let format = negotiate_format(requested)?;
        *self.format.lock().unwrap_or_else(|e| e.into_inner()) = format;
        Ok(format)
    }
}

impl<T: ControlTransport> SupportsCapability for ControlDevice<T> {
    fn capability_info(&self) -> CapabilityInfo {
        self.capability_info.clone()
    }

    fn queue_info(&self) -> QueueInfo {
        self.queue.clone()
    }
}

/// The control half of an attached camera
pub struct ControlSubDevice<T: ControlTransport + Send + 'static> {
    state: SubDeviceState,
    location: DeviceLocation,
    device: Option<Arc<ControlDevice<T>>>,
    node: Option<String>,
    framework: Arc<dyn VideoFramework>,
}

impl<T: ControlTransport + Send + 'static> ControlSubDevice<T> {
    /// Probe the control interface and register it with the framework
    ///
    /// On failure everything allocated so far is released and the sub-device
    /// ends up freed.
    pub fn probe(
        transport: T,
        descriptors: DeviceDescriptors,
        location: DeviceLocation,
        settings: &ProbeSettings,
        framework: Arc<dyn VideoFramework>,
    ) -> Result<Self> {
        let mut state = SubDeviceState::Unbound;
        transition(SubDeviceKind::Control, location, &mut state, SubDeviceState::Allocated);
        transition(SubDeviceKind::Control, location, &mut state, SubDeviceState::Probing);

        let built = Self::build(descriptors, location, settings).finish(transport, settings);
        let device = match built {
            Ok(device) => device,
            Err(e) => {
                warn!("Control probe of {} failed: {}", location, e);
                transition(SubDeviceKind::Control, location, &mut state, SubDeviceState::Freed);
                return Err(e);
            }
        };
        let device = Arc::new(device);

        let node = match framework.register(Arc::clone(&device) as Arc<dyn VideoNode>) {
            Ok(node) => node,
            Err(e) => {
                warn!("Registering {} failed: {}", location, e);
                transition(SubDeviceKind::Control, location, &mut state, SubDeviceState::Freed);
                return Err(e);
            }
        };

        transition(SubDeviceKind::Control, location, &mut state, SubDeviceState::Attached);
        info!("Control sub-device {} attached as {}", location, node);

        Ok(Self {
            state,
            location,
            device: Some(device),
            node: Some(node),
            framework,
        })
    }

    fn build(descriptors: DeviceDescriptors, location: DeviceLocation, settings: &ProbeSettings) -> ProbeParts {
        let DeviceDescriptors { identity, forest } = descriptors;

        let streaming = forest.find_streaming_setting(settings.streaming_interface, settings.iso_packet_size);
        match streaming {
            Some(sel) => debug!(
                "Streaming uses interface {} alt {} endpoint {:#04x}",
                sel.interface_number, sel.alternate_setting, sel.endpoint_address
            ),
            None => warn!(
                "No alternate setting of interface {} offers {}-byte packets",
                settings.streaming_interface, settings.iso_packet_size
            ),
        }

        let capability = ControlCapability::from_forest(&forest, settings.control_interface);
        info!(
            "Device {} controls: brightness={}, contrast={}, hue={}",
            location, capability.brightness, capability.contrast, capability.hue
        );

        ProbeParts {
            location,
            identity,
            forest,
            capability,
            streaming,
        }
    }

    pub fn state(&self) -> SubDeviceState {
        self.state
    }

    pub fn location(&self) -> DeviceLocation {
        self.location
    }

    /// Framework node name while attached
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn device(&self) -> Result<&Arc<ControlDevice<T>>> {
        self.device.as_ref().ok_or(CameraError::NotAttached)
    }

    fn teardown(&mut self) {
        if self.state == SubDeviceState::Freed {
            return;
        }
        transition(SubDeviceKind::Control, self.location, &mut self.state, SubDeviceState::Disconnecting);

        if let Some(node) = self.node.take() {
            match self.framework.unregister(&node) {
                Ok(released) => drop(released),
                Err(e) => warn!("Unregistering {} failed: {}", node, e),
            }
        }

        if let Some(device) = self.device.take()
            && Arc::strong_count(&device) > 1
        {
            debug!(
                "Control state of {} still referenced by {} in-flight user(s), freed on last drop",
                self.location,
                Arc::strong_count(&device) - 1
            );
        }

        transition(SubDeviceKind::Control, self.location, &mut self.state, SubDeviceState::Freed);
    }

    /// Unregister from the framework, then release the owned state
    pub fn disconnect(mut self) {
        self.teardown();
        info!("Control sub-device {} detached", self.location);
    }
}

impl<T: ControlTransport + Send + 'static> Drop for ControlSubDevice<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Probe results before the client is constructed
struct ProbeParts {
    location: DeviceLocation,
    identity: Option<DeviceIdentity>,
    forest: Arc<DescriptorForest>,
    capability: ControlCapability,
    streaming: Option<StreamingSelection>,
}

impl ProbeParts {
    fn finish<T: ControlTransport>(self, transport: T, settings: &ProbeSettings) -> Result<ControlDevice<T>> {
        let mut client = ControlClient::new(transport, settings.client_settings(), self.capability)?;

        // Ranges are cached so later Sets run only their own bracket
        for control in self.capability.supported() {
            let reset = settings.reset_on_probe.contains(&control);
            if let Err(e) = client.query_range(control, reset) {
                warn!("Range query for {} on {} failed: {}", control, self.location, e);
            }
        }

        Ok(ControlDevice {
            client: Mutex::new(client),
            forest: self.forest,
            identity: self.identity,
            capability: self.capability,
            capability_info: CapabilityInfo::for_bus(self.location.bus_number, self.location.device_address),
            format: Mutex::new(PixelFormat::yuyv_720p()),
            streaming: self.streaming,
            queue: QueueInfo::default(),
        })
    }
}

/// The streaming half of an attached camera
///
/// Holds the selected alternate setting, a packet buffer sized for it and a
/// raw framework handle. Frame transfer is not implemented.
pub struct StreamingSubDevice {
    state: SubDeviceState,
    location: DeviceLocation,
    selection: StreamingSelection,
    buffer: Vec<u8>,
    minor: Option<u32>,
    framework: Arc<dyn VideoFramework>,
}

impl StreamingSubDevice {
    pub fn probe(
        forest: &DescriptorForest,
        location: DeviceLocation,
        settings: &ProbeSettings,
        framework: Arc<dyn VideoFramework>,
    ) -> Result<Self> {
        let mut state = SubDeviceState::Unbound;
        transition(SubDeviceKind::Streaming, location, &mut state, SubDeviceState::Allocated);
        transition(SubDeviceKind::Streaming, location, &mut state, SubDeviceState::Probing);

        let probed = Self::select(forest, settings).and_then(|(selection, buffer)| {
            framework
                .register_raw(selection.interface_number)
                .map(|minor| (selection, buffer, minor))
        });

        let (selection, buffer, minor) = match probed {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Streaming probe of {} failed: {}", location, e);
                transition(SubDeviceKind::Streaming, location, &mut state, SubDeviceState::Freed);
                return Err(e);
            }
        };

        transition(SubDeviceKind::Streaming, location, &mut state, SubDeviceState::Attached);
        info!(
            "Streaming sub-device {} attached as {} (alt {}, {}-byte packets)",
            location,
            raw_node_name(minor),
            selection.alternate_setting,
            selection.packet_size
        );

        Ok(Self {
            state,
            location,
            selection,
            buffer,
            minor: Some(minor),
            framework,
        })
    }

    fn select(forest: &DescriptorForest, settings: &ProbeSettings) -> Result<(StreamingSelection, Vec<u8>)> {
        let selection = forest
            .find_streaming_setting(settings.streaming_interface, settings.iso_packet_size)
            .ok_or(CameraError::NoMatchingAltSetting {
                expected: settings.iso_packet_size,
            })?;

        let size = usize::from(selection.packet_size);
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(size)
            .map_err(|_| CameraError::Allocation {
                what: "isochronous packet buffer".to_string(),
                size,
            })?;
        buffer.resize(size, 0);

        Ok((selection, buffer))
    }

    pub fn state(&self) -> SubDeviceState {
        self.state
    }

    pub fn selection(&self) -> StreamingSelection {
        self.selection
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn minor(&self) -> Option<u32> {
        self.minor
    }

    fn teardown(&mut self) {
        if self.state == SubDeviceState::Freed {
            return;
        }
        transition(SubDeviceKind::Streaming, self.location, &mut self.state, SubDeviceState::Disconnecting);

        if let Some(minor) = self.minor.take()
            && let Err(e) = self.framework.unregister_raw(minor)
        {
            warn!("Unregistering minor {} failed: {}", minor, e);
        }
        self.buffer = Vec::new();

        transition(SubDeviceKind::Streaming, self.location, &mut self.state, SubDeviceState::Freed);
    }

    pub fn disconnect(mut self) {
        self.teardown();
        info!("Streaming sub-device {} detached", self.location);
    }
}

impl Drop for StreamingSubDevice {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Both sub-devices of one physical camera
pub struct AttachedCamera<T: ControlTransport + Send + 'static> {
    location: DeviceLocation,
    control: ControlSubDevice<T>,
    streaming: Option<StreamingSubDevice>,
}

impl<T: ControlTransport + Send + 'static> AttachedCamera<T> {
    pub fn location(&self) -> DeviceLocation {
        self.location
    }

    pub fn control(&self) -> &ControlSubDevice<T> {
        &self.control
    }

    pub fn streaming(&self) -> Option<&StreamingSubDevice> {
        self.streaming.as_ref()
    }

    /// Control state, or `NotAttached` once torn down
    pub fn device(&self) -> Result<&Arc<ControlDevice<T>>> {
        self.control.device()
    }

    pub fn info(&self, summary: DeviceSummary) -> Result<CameraInfo> {
        let device = self.device()?;
        Ok(CameraInfo {
            summary,
            node: self.control.node().unwrap_or_default().to_string(),
            capability: device.capability(),
            capability_info: device.capability_info(),
            format: device.get_format(),
            streaming: self
                .streaming
                .as_ref()
                .map(|s| s.selection())
                .or(device.streaming()),
        })
    }

    /// Tear down the streaming half, then the control half
    pub fn disconnect(self) {
        if let Some(streaming) = self.streaming {
            streaming.disconnect();
        }
        self.control.disconnect();
    }
}

/// Probe both sub-devices of one camera concurrently
///
/// Descriptors are read once on the calling thread; after that only the
/// control half talks to the device. A control probe failure fails the attach
/// and tears the streaming half back down. A streaming failure only loses
/// streaming; controls stay usable.
pub fn probe_camera<T>(
    mut transport: T,
    layouts: &[InterfaceLayout],
    location: DeviceLocation,
    settings: &ProbeSettings,
    framework: Arc<dyn VideoFramework>,
) -> Result<AttachedCamera<T>>
where
    T: ControlTransport + Send + 'static,
{
    let settings = settings.classified(layouts);
    let settings = &settings;

    let descriptors = DeviceDescriptors::read(&mut transport, location, settings).map_err(|e| {
        warn!("Reading descriptors of {} failed: {}", location, e);
        e
    })?;
    let forest = Arc::clone(&descriptors.forest);
    let control_framework = Arc::clone(&framework);
    let streaming_framework = framework;

    let (control, streaming) = std::thread::scope(|scope| {
        let control = std::thread::Builder::new()
            .name("probe-control".to_string())
            .spawn_scoped(scope, move || {
                ControlSubDevice::probe(transport, descriptors, location, settings, control_framework)
            })
            .expect("Failed to spawn control probe thread");

        let streaming = std::thread::Builder::new()
            .name("probe-streaming".to_string())
            .spawn_scoped(scope, move || {
                StreamingSubDevice::probe(&forest, location, settings, streaming_framework)
            })
            .expect("Failed to spawn streaming probe thread");

        (
            control
                .join()
                .unwrap_or_else(|_| Err(CameraError::Registration("control probe panicked".to_string()))),
            streaming
                .join()
                .unwrap_or_else(|_| Err(CameraError::Registration("streaming probe panicked".to_string()))),
        )
    });

    let control = match control {
        Ok(control) => control,
        Err(e) => {
            if let Ok(streaming) = streaming {
                streaming.disconnect();
            }
            return Err(e);
        }
    };

    let streaming = match streaming {
        Ok(streaming) => Some(streaming),
        Err(e) => {
            warn!("Camera {} attached without streaming: {}", location, e);
            None
        }
    };

    Ok(AttachedCamera {
        location,
        control,
        streaming,
    })
}
