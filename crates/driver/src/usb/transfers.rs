//! USB control transfer execution
//!
//! [`RusbTransport`] implements the control transfer contract on a libusb
//! handle and maps rusb errors to protocol errors. The descriptor fetch helpers
//! work against any [`ControlTransport`].

use protocol::types::{CONFIGURATION_HEADER_LEN, DEVICE_DESCRIPTOR_LEN, descriptor_type, request};
use protocol::{
    CameraError, ControlSetup, ControlTransport, Direction, Recipient, RequestKind,
    TransportError, check_timeout,
};
use rusb::{Context, DeviceHandle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Control transfers on an opened libusb device
///
/// Shares the handle with the owning [`UsbDevice`](super::device::UsbDevice),
/// which releases the interfaces once this transport is dropped.
pub struct RusbTransport {
    handle: Arc<DeviceHandle<Context>>,
}

impl RusbTransport {
    pub fn new(handle: Arc<DeviceHandle<Context>>) -> Self {
        Self { handle }
    }
}

impl ControlTransport for RusbTransport {
    fn send(
        &mut self,
        setup: &ControlSetup,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        check_timeout(timeout)?;
        let request_type = setup.request_type(Direction::Out);
        debug!(
            "Control OUT: request_type={:#04x}, request={:#04x}, value={:#06x}, index={:#06x}, len={}",
            request_type,
            setup.request,
            setup.value,
            setup.index,
            payload.len()
        );

        self.handle
            .write_control(
                request_type,
                setup.request,
                setup.value,
                setup.index,
                payload,
                timeout,
            )
            .map_err(|e| {
                warn!("Control OUT {:#04x} failed: {}", setup.request, e);
                map_rusb_error(e)
            })
    }

    fn receive(
        &mut self,
        setup: &ControlSetup,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        check_timeout(timeout)?;
        let request_type = setup.request_type(Direction::In);
        debug!(
            "Control IN: request_type={:#04x}, request={:#04x}, value={:#06x}, index={:#06x}, len={}",
            request_type,
            setup.request,
            setup.value,
            setup.index,
            buf.len()
        );

        self.handle
            .read_control(request_type, setup.request, setup.value, setup.index, buf, timeout)
            .map_err(|e| {
                warn!("Control IN {:#04x} failed: {}", setup.request, e);
                map_rusb_error(e)
            })
    }
}

/// GET_DESCRIPTOR setup for a device-level descriptor
pub fn descriptor_setup(kind: u8) -> ControlSetup {
    ControlSetup::new(
        request::GET_DESCRIPTOR,
        RequestKind::Standard,
        Recipient::Device,
        u16::from(kind) << 8,
        0,
    )
}

/// Read the 18-byte device descriptor
///
/// Returns the bytes actually received, which may be fewer.
pub fn fetch_device_descriptor<T: ControlTransport + ?Sized>(
    transport: &mut T,
    timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    let mut buf = vec![0u8; DEVICE_DESCRIPTOR_LEN];
    let n = transport.receive(&descriptor_setup(descriptor_type::DEVICE), &mut buf, timeout)?;
    buf.truncate(n);
    Ok(buf)
}

/// Read the full configuration descriptor blob
///
/// The 9-byte header is read first to learn `wTotalLength`, then exactly that
/// many bytes are requested.
pub fn fetch_configuration_blob<T: ControlTransport + ?Sized>(
    transport: &mut T,
    timeout: Duration,
) -> Result<Vec<u8>, CameraError> {
    let setup = descriptor_setup(descriptor_type::CONFIGURATION);

    let mut header = [0u8; CONFIGURATION_HEADER_LEN];
    let n = transport.receive(&setup, &mut header, timeout)?;
    if n < CONFIGURATION_HEADER_LEN {
        return Err(TransportError::ShortTransfer {
            expected: CONFIGURATION_HEADER_LEN,
            actual: n,
        }
        .into());
    }

    let total = u16::from_le_bytes([header[2], header[3]]) as usize;
    if total < CONFIGURATION_HEADER_LEN {
        return Err(TransportError::ShortTransfer {
            expected: CONFIGURATION_HEADER_LEN,
            actual: total,
        }
        .into());
    }

    let mut blob = Vec::new();
    blob.try_reserve_exact(total)
        .map_err(|_| CameraError::Allocation {
            what: "configuration descriptor".to_string(),
            size: total,
        })?;
    blob.resize(total, 0);

    let n = transport.receive(&setup, &mut blob, timeout)?;
    if n < total {
        return Err(TransportError::ShortTransfer {
            expected: total,
            actual: n,
        }
        .into());
    }

    debug!("Fetched {}-byte configuration descriptor", total);
    Ok(blob)
}

/// Map rusb::Error to protocol::TransportError
pub fn map_rusb_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe => TransportError::Stall,
        rusb::Error::NoDevice => TransportError::Disconnected,
        rusb::Error::Busy => TransportError::Busy,
        rusb::Error::Overflow => TransportError::Overflow,
        rusb::Error::Io => TransportError::Io,
        rusb::Error::Access => TransportError::Access,
        _ => TransportError::Other {
            message: err.to_string(),
        },
    }
}
