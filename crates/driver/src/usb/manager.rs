//! USB device manager
//!
//! Discovers cameras matching the configured vendor/product filter, opens
//! them and keeps each attached camera together with the USB device it was
//! probed from.

use crate::camera::framework::SupportsControl;
use crate::camera::{AttachedCamera, ProbeSettings, VideoFramework, VideoRegistry, probe_camera};
use crate::usb::device::UsbDevice;
use crate::usb::transfers::{RusbTransport, map_rusb_error};
use protocol::{
    CameraControl, CameraError, CameraInfo, ControlInfo, DescriptorForest, DeviceLocation,
    DeviceSummary, Result, SetOutcome, StreamState,
};
use rusb::{Context, Device, UsbContext};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An attached camera and the device it lives on
///
/// Field order matters: the camera and its transports drop before the device
/// releases its interfaces.
struct ManagedCamera {
    summary: DeviceSummary,
    camera: AttachedCamera<RusbTransport>,
    device: UsbDevice,
}

/// Camera discovery and attach bookkeeping
pub struct DeviceManager {
    /// rusb context
    context: Context,
    /// Allowed devices as "0xVID:0xPID" strings, `*` matches anything
    filters: Vec<String>,
    settings: ProbeSettings,
    framework: Arc<VideoRegistry>,
    attached: HashMap<DeviceLocation, ManagedCamera>,
}

impl DeviceManager {
    /// Create a new device manager
    pub fn new(
        filters: Vec<String>,
        settings: ProbeSettings,
        framework: Arc<VideoRegistry>,
    ) -> std::result::Result<Self, rusb::Error> {
        let context = Context::new()?;

        Ok(Self {
            context,
            filters,
            settings,
            framework,
            attached: HashMap::new(),
        })
    }

    pub fn framework(&self) -> &Arc<VideoRegistry> {
        &self.framework
    }

    pub fn attached_locations(&self) -> Vec<DeviceLocation> {
        let mut locations: Vec<_> = self.attached.keys().copied().collect();
        locations.sort();
        locations
    }

    fn matching_devices(&self) -> Result<Vec<Device<Context>>> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        Ok(devices
            .iter()
            .filter(|device| self.is_device_allowed(device))
            .collect())
    }

    /// List connected cameras
    pub fn list_devices(&self) -> Result<Vec<DeviceSummary>> {
        let summaries = self
            .matching_devices()?
            .into_iter()
            .filter_map(|device| match UsbDevice::new(device) {
                Ok(usb) => Some(usb.summary()),
                Err(e) => {
                    warn!("Skipping device without readable descriptor: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();

        debug!("Found {} matching camera(s)", summaries.len());
        Ok(summaries)
    }

    /// Open and probe a camera
    ///
    /// With no location the first matching camera is used. Attaching an
    /// already attached camera returns its current info.
    pub fn attach(&mut self, location: Option<DeviceLocation>) -> Result<CameraInfo> {
        if let Some(location) = location
            && let Some(managed) = self.attached.get(&location)
        {
            return managed.camera.info(managed.summary.clone());
        }

        let device = self
            .matching_devices()?
            .into_iter()
            .find(|device| {
                location.is_none_or(|loc| {
                    loc.bus_number == device.bus_number() && loc.device_address == device.address()
                })
            })
            .ok_or(CameraError::NotAttached)?;

        let mut usb = UsbDevice::new(device).map_err(map_rusb_error)?;
        let location = usb.location();
        if self.attached.contains_key(&location) {
            let managed = &self.attached[&location];
            return managed.camera.info(managed.summary.clone());
        }

        let layouts = usb.interface_layouts().map_err(map_rusb_error)?;
        let handle = usb.open()?;
        let summary = usb.summary();
        info!(
            "Attaching {:04x}:{:04x} at {} ({} interface(s))",
            summary.vendor_id,
            summary.product_id,
            location,
            layouts.len()
        );

        let camera = match probe_camera(
            RusbTransport::new(handle),
            &layouts,
            location,
            &self.settings,
            Arc::clone(&self.framework) as Arc<dyn VideoFramework>,
        ) {
            Ok(camera) => camera,
            Err(e) => {
                usb.close();
                return Err(e);
            }
        };

        let info = camera.info(summary.clone())?;
        self.attached.insert(
            location,
            ManagedCamera {
                summary,
                camera,
                device: usb,
            },
        );

        Ok(info)
    }

    fn camera(&self, location: DeviceLocation) -> Result<&AttachedCamera<RusbTransport>> {
        self.attached
            .get(&location)
            .map(|managed| &managed.camera)
            .ok_or(CameraError::NotAttached)
    }

    /// Descriptor forest parsed when the camera was attached
    pub fn describe(&self, location: DeviceLocation) -> Result<DescriptorForest> {
        Ok(self.camera(location)?.device()?.forest().clone())
    }

    pub fn controls(&self, location: DeviceLocation) -> Result<Vec<ControlInfo>> {
        self.camera(location)?.device()?.controls()
    }

    pub fn get(&self, location: DeviceLocation, control: CameraControl) -> Result<i32> {
        self.camera(location)?.device()?.get_control(control)
    }

    pub fn set(&self, location: DeviceLocation, control: CameraControl, value: i32) -> Result<SetOutcome> {
        self.camera(location)?.device()?.set_control(control, value)
    }

    pub fn stream_state(&self, location: DeviceLocation) -> Result<StreamState> {
        Ok(self.camera(location)?.device()?.stream_state())
    }

    /// Tear down both sub-devices and release the USB device
    pub fn detach(&mut self, location: DeviceLocation) -> Result<()> {
        let managed = self
            .attached
            .remove(&location)
            .ok_or(CameraError::NotAttached)?;

        let ManagedCamera {
            camera, mut device, ..
        } = managed;
        camera.disconnect();
        device.close();

        info!("Detached camera at {}", location);
        Ok(())
    }

    pub fn detach_all(&mut self) {
        for location in self.attached_locations() {
            if let Err(e) = self.detach(location) {
                warn!("Failed to detach {}: {}", location, e);
            }
        }
    }

    fn is_device_allowed(&self, device: &Device<Context>) -> bool {
        match device.device_descriptor() {
            Ok(desc) => Self::check_filter(desc.vendor_id(), desc.product_id(), &self.filters),
            Err(_) => false,
        }
    }

    /// Check a vendor/product pair against "0xVID:0xPID" filters
    ///
    /// Either half may be `*`. No filters allows every device.
    pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
        if filters.is_empty() {
            return true;
        }

        filters.iter().any(|filter| {
            let Some((filter_vid, filter_pid)) = filter.split_once(':') else {
                return false;
            };
            matches_id(filter_vid, vid) && matches_id(filter_pid, pid)
        })
    }
}

fn matches_id(pattern: &str, id: u16) -> bool {
    let pattern = pattern.trim();
    if pattern == "*" {
        return true;
    }
    let digits = pattern
        .strip_prefix("0x")
        .or_else(|| pattern.strip_prefix("0X"))
        .unwrap_or(pattern);
    u16::from_str_radix(digits, 16)
        .map(|v| v == id)
        .unwrap_or(false)
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.detach_all();
    }
}
