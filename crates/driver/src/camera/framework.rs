//! Boundary to the host video framework
//!
//! The control sub-device exposes itself through three small capability
//! traits. [`VideoFramework`] is the only place that knows how nodes are
//! registered; [`VideoRegistry`] is the in-process implementation used by the
//! driver and its tests.

use protocol::format::PIXEL_FORMAT_YUYV;
use protocol::{
    CameraControl, CameraError, CapabilityInfo, ControlRange, PixelFormat, QueueInfo, Result,
    SetOutcome,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// First minor number handed out for raw streaming handles
pub const RAW_MINOR_BASE: u32 = 192;

/// Per-control get/set callbacks
pub trait SupportsControl {
    fn supported_controls(&self) -> Vec<CameraControl>;

    fn control_range(&self, control: CameraControl) -> Result<ControlRange>;

    fn get_control(&self, control: CameraControl) -> Result<i32>;

    fn set_control(&self, control: CameraControl, value: i32) -> Result<SetOutcome>;
}

/// Format negotiation
pub trait SupportsFormat {
    fn enum_formats(&self) -> Vec<PixelFormat>;

    fn get_format(&self) -> PixelFormat;

    /// Check a requested format without applying it
    fn try_format(&self, requested: &PixelFormat) -> Result<PixelFormat>;

    fn set_format(&self, requested: &PixelFormat) -> Result<PixelFormat>;
}

/// Identity and queue metadata
pub trait SupportsCapability {
    fn capability_info(&self) -> CapabilityInfo;

    fn queue_info(&self) -> QueueInfo;
}

/// Everything a registered video node must answer
pub trait VideoNode: SupportsControl + SupportsFormat + SupportsCapability + Send + Sync {}

impl<T> VideoNode for T where T: SupportsControl + SupportsFormat + SupportsCapability + Send + Sync {}

/// Registration surface of the host video framework
pub trait VideoFramework: Send + Sync {
    /// Register a video node and return its name, e.g. `video0`
    fn register(&self, node: Arc<dyn VideoNode>) -> Result<String>;

    /// Remove a node so no new requests reach it
    ///
    /// Returns the framework's reference; callers already holding one keep the
    /// node alive until they drop it.
    fn unregister(&self, name: &str) -> Result<Arc<dyn VideoNode>>;

    /// Register a raw character handle for a streaming interface
    fn register_raw(&self, interface: u8) -> Result<u32>;

    fn unregister_raw(&self, minor: u32) -> Result<()>;
}

/// Accept only the one format the camera produces
///
/// Width, height and pixel encoding must match exactly; the remaining fields
/// are filled in from the fixed format.
pub fn negotiate_format(requested: &PixelFormat) -> Result<PixelFormat> {
    let supported = PixelFormat::yuyv_720p();
    if requested.width == supported.width
        && requested.height == supported.height
        && requested.pixel_format == PIXEL_FORMAT_YUYV
    {
        Ok(supported)
    } else {
        Err(CameraError::InvalidFormat(format!(
            "{}x{} {}",
            requested.width,
            requested.height,
            requested.fourcc_str()
        )))
    }
}

/// Name of a raw streaming handle
///
/// Minors outside the raw range handed out by another framework keep their
/// absolute number.
pub fn raw_node_name(minor: u32) -> String {
    match minor.checked_sub(RAW_MINOR_BASE) {
        Some(index) => format!("usb/video{}", index),
        None => format!("usb/minor{}", minor),
    }
}

#[derive(Default)]
struct RegistryState {
    nodes: BTreeMap<u32, Arc<dyn VideoNode>>,
    raw: BTreeMap<u32, u8>,
}

impl RegistryState {
    fn free_slot<V>(map: &BTreeMap<u32, V>, base: u32) -> u32 {
        (base..)
            .find(|n| !map.contains_key(n))
            .unwrap_or(base)
    }
}

/// In-process video framework
///
/// Node numbers are reused lowest-first once released.
#[derive(Default)]
pub struct VideoRegistry {
    state: Mutex<RegistryState>,
}

impl VideoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a registered node by name
    pub fn node(&self, name: &str) -> Option<Arc<dyn VideoNode>> {
        let index = parse_node_name(name)?;
        self.lock().nodes.get(&index).cloned()
    }

    pub fn node_names(&self) -> Vec<String> {
        self.lock()
            .nodes
            .keys()
            .map(|n| format!("video{}", n))
            .collect()
    }

    pub fn raw_minors(&self) -> Vec<u32> {
        self.lock().raw.keys().copied().collect()
    }
}

fn parse_node_name(name: &str) -> Option<u32> {
    name.strip_prefix("video")?.parse().ok()
}

impl VideoFramework for VideoRegistry {
    fn register(&self, node: Arc<dyn VideoNode>) -> Result<String> {
        let mut state = self.lock();
        let index = RegistryState::free_slot(&state.nodes, 0);
        state.nodes.insert(index, node);

        let name = format!("video{}", index);
        info!("Registered video node {}", name);
        Ok(name)
    }

    fn unregister(&self, name: &str) -> Result<Arc<dyn VideoNode>> {
        let index = parse_node_name(name)
            .ok_or_else(|| CameraError::Registration(format!("invalid node name '{}'", name)))?;
        let node = self
            .lock()
            .nodes
            .remove(&index)
            .ok_or_else(|| CameraError::Registration(format!("{} is not registered", name)))?;

        info!("Unregistered video node {}", name);
        Ok(node)
    }

    fn register_raw(&self, interface: u8) -> Result<u32> {
        let mut state = self.lock();
        let minor = RegistryState::free_slot(&state.raw, RAW_MINOR_BASE);
        state.raw.insert(minor, interface);

        debug!(
            "Registered {} (minor {}) for interface {}",
            raw_node_name(minor),
            minor,
            interface
        );
        Ok(minor)
    }

    fn unregister_raw(&self, minor: u32) -> Result<()> {
        self.lock()
            .raw
            .remove(&minor)
            .map(|_| debug!("Unregistered raw minor {}", minor))
            .ok_or_else(|| CameraError::Registration(format!("minor {} is not registered", minor)))
    }
}
