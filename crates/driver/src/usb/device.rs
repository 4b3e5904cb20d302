//! USB device abstraction
//!
//! Wraps rusb::Device with its cached descriptor, and handles the kernel
//! driver detach/reattach and interface claiming around an open handle.

use crate::camera::InterfaceLayout;
use protocol::{CameraError, DeviceLocation, DeviceSummary};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle};
use std::sync::Arc;
use tracing::{debug, warn};

/// USB device wrapper with cached information
pub struct UsbDevice {
    /// Underlying rusb device
    device: Device<Context>,
    /// Cached device descriptor
    descriptor: DeviceDescriptor,
    /// Device handle (if opened), shared with the transports
    handle: Option<Arc<DeviceHandle<Context>>>,
    /// List of interfaces claimed by us
    claimed_interfaces: Vec<u8>,
}

impl UsbDevice {
    /// Create a new USB device wrapper
    ///
    /// Reads and caches the device descriptor.
    pub fn new(device: Device<Context>) -> Result<Self, rusb::Error> {
        let descriptor = device.device_descriptor()?;

        Ok(Self {
            device,
            descriptor,
            handle: None,
            claimed_interfaces: Vec::new(),
        })
    }

    pub fn location(&self) -> DeviceLocation {
        DeviceLocation {
            bus_number: self.device.bus_number(),
            device_address: self.device.address(),
        }
    }

    pub fn vendor_id(&self) -> u16 {
        self.descriptor.vendor_id()
    }

    pub fn product_id(&self) -> u16 {
        self.descriptor.product_id()
    }

    /// Convert to protocol DeviceSummary
    ///
    /// Reads string descriptors (manufacturer, product, serial) if available.
    pub fn summary(&self) -> DeviceSummary {
        let strings = match &self.handle {
            Some(handle) => self.read_string_descriptors(handle),
            None => self
                .device
                .open()
                .map(|handle| self.read_string_descriptors(&handle))
                .unwrap_or_default(),
        };
        let (manufacturer, product, serial_number) = strings;
        let location = self.location();

        DeviceSummary {
            bus_number: location.bus_number,
            device_address: location.device_address,
            vendor_id: self.vendor_id(),
            product_id: self.product_id(),
            manufacturer,
            product,
            serial_number,
        }
    }

    /// Interfaces of the active configuration with their alternate setting counts
    pub fn interface_layouts(&self) -> Result<Vec<InterfaceLayout>, rusb::Error> {
        let config = self.device.active_config_descriptor()?;
        Ok(config
            .interfaces()
            .map(|interface| InterfaceLayout {
                number: interface.number(),
                alt_settings: interface.descriptors().count(),
            })
            .collect())
    }

    /// Open the device for transfers
    ///
    /// Detaches kernel drivers and claims every interface of the active
    /// configuration, then returns the handle to share with the transports.
    pub fn open(&mut self) -> Result<Arc<DeviceHandle<Context>>, CameraError> {
        if let Some(handle) = &self.handle {
            return Ok(Arc::clone(handle));
        }

        let handle = self.device.open().map_err(|e| {
            warn!("Failed to open device {}: {}", self.location(), e);
            CameraError::Transport(super::transfers::map_rusb_error(e))
        })?;

        debug!("Opened device {}", self.location());

        let layouts = self.interface_layouts().map_err(|e| {
            warn!("Failed to get active config descriptor: {}", e);
            CameraError::Transport(super::transfers::map_rusb_error(e))
        })?;

        for layout in &layouts {
            let interface_number = layout.number;

            match handle.kernel_driver_active(interface_number) {
                Ok(true) => {
                    debug!(
                        "Detaching kernel driver from interface {} on device {}",
                        interface_number,
                        self.location()
                    );
                    if let Err(e) = handle.detach_kernel_driver(interface_number) {
                        // Claiming will most likely fail next and report it
                        warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            interface_number, e
                        );
                    }
                }
                Ok(false) => {
                    debug!("No kernel driver active on interface {}", interface_number);
                }
                Err(e) => {
                    debug!(
                        "Could not check kernel driver status for interface {}: {}",
                        interface_number, e
                    );
                }
            }

            if let Err(e) = handle.claim_interface(interface_number) {
                warn!("Failed to claim interface {}: {}", interface_number, e);
                self.restore(&handle);
                return Err(CameraError::Transport(super::transfers::map_rusb_error(e)));
            }

            debug!(
                "Claimed interface {} ({} alt setting(s)) on device {}",
                interface_number,
                layout.alt_settings,
                self.location()
            );
            self.claimed_interfaces.push(interface_number);
        }

        let handle = Arc::new(handle);
        self.handle = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Release claimed interfaces and reattach kernel drivers
    fn restore(&mut self, handle: &DeviceHandle<Context>) {
        for interface in self.claimed_interfaces.drain(..) {
            if let Err(e) = handle.release_interface(interface) {
                warn!("Failed to release interface {}: {}", interface, e);
            }

            if let Err(e) = handle.attach_kernel_driver(interface) {
                debug!(
                    "Could not reattach kernel driver to interface {} (may not have been detached): {}",
                    interface, e
                );
            } else {
                debug!("Reattached kernel driver to interface {}", interface);
            }
        }
    }

    /// Close the device
    ///
    /// The transports should have been dropped first; a handle that is still
    /// shared is logged before its interfaces are released.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            let users = Arc::strong_count(&handle) - 1;
            if users > 0 {
                warn!(
                    "Closing {} while {} transport(s) still hold the handle",
                    self.location(),
                    users
                );
            }
            self.restore(&handle);
            debug!("Closed device {}", self.location());
        }
    }

    /// Check if device is open
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Read string descriptors from device
    fn read_string_descriptors(
        &self,
        handle: &DeviceHandle<Context>,
    ) -> (Option<String>, Option<String>, Option<String>) {
        let manufacturer = self
            .descriptor
            .manufacturer_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

        let product = self
            .descriptor
            .product_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

        let serial_number = self
            .descriptor
            .serial_number_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

        (manufacturer, product, serial_number)
    }
}

impl Drop for UsbDevice {
    fn drop(&mut self) {
        self.close();
    }
}
