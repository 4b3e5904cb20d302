//! Test utilities for uvc-cam
//!
//! Provides a simulated camera, synthetic descriptor blobs and helper functions
//! for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockCamera, sample_camera_blob};
//! use protocol::DescriptorForest;
//!
//! let forest = DescriptorForest::parse(&sample_camera_blob()).unwrap();
//! assert_eq!(forest.alternate_settings(1).count(), 9);
//!
//! let camera = MockCamera::new();
//! assert!(camera.transfers().is_empty());
//! ```

use protocol::types::{
    CAMERA_PRODUCT_ID, CAMERA_VENDOR_ID, class_request, descriptor_type, request, vc_subtype,
    vs_subtype,
};
use protocol::{
    CameraControl, ControlRange, ControlSetup, ControlTransport, Direction, DeviceSummary,
    RequestKind, TransportError, check_timeout, decode_value, encode_value,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub use protocol::{DescriptorBlobBuilder, device_descriptor};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Isochronous packet sizes of the sample streaming interface, by alternate setting
pub const SAMPLE_PACKET_SIZES: [u16; 9] = [0, 160, 208, 760, 780, 812, 976, 1020, 1023];

/// Configuration descriptor of a typical single-format webcam
///
/// Interface 0 is the control interface (one alternate setting) carrying a
/// header, camera input terminal, processing unit (brightness, contrast and
/// hue) and output terminal. Interface 1 is the streaming interface with nine
/// alternate settings, see [`SAMPLE_PACKET_SIZES`].
pub fn sample_camera_blob() -> Vec<u8> {
    sample_camera_blob_with_controls(0x0007)
}

/// [`sample_camera_blob`] with a custom processing unit `bmControls` bitmap
pub fn sample_camera_blob_with_controls(bitmap: u16) -> Vec<u8> {
    let [lo, hi] = bitmap.to_le_bytes();
    let mut builder = DescriptorBlobBuilder::new()
        .configuration(1, 2)
        .raw(&[8, descriptor_type::INTERFACE_ASSOCIATION, 0, 2, 0x0E, 0x03, 0x00, 2])
        .interface(0, 0, 1, 0x0E, 0x01)
        .video_interface(
            vc_subtype::HEADER,
            &[0x00, 0x01, 0x4D, 0x00, 0x80, 0x8D, 0x5B, 0x00, 1, 1],
        )
        .video_interface(
            vc_subtype::INPUT_TERMINAL,
            &[1, 0x01, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 0x00, 0x00, 0x00],
        )
        .video_interface(vc_subtype::PROCESSING_UNIT, &[2, 1, 0, 0, 2, lo, hi, 0])
        .video_interface(vc_subtype::OUTPUT_TERMINAL, &[3, 0x01, 0x01, 0, 2, 0])
        .endpoint(0x83, 0x03, 0x0010, 6)
        .raw(&[5, descriptor_type::VIDEO_ENDPOINT, 0x03, 0x10, 0x00]);

    for (alt, size) in SAMPLE_PACKET_SIZES.iter().enumerate() {
        builder = builder.interface(1, alt as u8, 1, 0x0E, 0x02);
        if alt == 0 {
            builder = builder
                .video_interface(
                    vs_subtype::INPUT_HEADER,
                    &[1, 0x49, 0x00, 0x81, 0, 3, 0, 0, 0, 1, 0],
                )
                .video_interface(
                    vs_subtype::FORMAT_UNCOMPRESSED,
                    &[
                        1, 1, b'Y', b'U', b'Y', b'2', 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00,
                        0xAA, 0x00, 0x38, 0x9B, 0x71, 16, 1, 0, 0, 0, 0,
                    ],
                );
        }
        builder = builder.endpoint(0x81, 0x05, *size, 1);
    }

    builder.build()
}

/// Device descriptor of the supported camera
pub fn sample_device_descriptor() -> Vec<u8> {
    device_descriptor(CAMERA_VENDOR_ID, CAMERA_PRODUCT_ID).to_vec()
}

/// Enumeration entry for a camera at the given bus position
pub fn create_mock_summary(bus_number: u8, device_address: u8) -> DeviceSummary {
    DeviceSummary {
        bus_number,
        device_address,
        vendor_id: CAMERA_VENDOR_ID,
        product_id: CAMERA_PRODUCT_ID,
        manufacturer: Some("Test Manufacturer".to_string()),
        product: Some("USB2.0 Camera".to_string()),
        serial_number: None,
    }
}

/// One transfer seen by [`MockCamera`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub direction: Direction,
    pub setup: ControlSetup,
    /// Payload written, or bytes returned to the caller
    pub data: Vec<u8>,
}

impl TransferRecord {
    /// Alternate setting requested, if this was a SET_INTERFACE
    pub fn alt_setting(&self) -> Option<u16> {
        (self.setup.kind == RequestKind::Standard && self.setup.request == request::SET_INTERFACE)
            .then_some(self.setup.value)
    }
}

#[derive(Debug, Clone)]
struct FailureRule {
    request: u8,
    /// Matching transfers to let through before failing
    skip: usize,
    error: TransportError,
}

#[derive(Debug, Clone, Copy)]
struct ControlSlot {
    range: ControlRange,
    current: i32,
}

#[derive(Debug)]
struct MockState {
    device_descriptor: Vec<u8>,
    config_blob: Vec<u8>,
    alt_settings: HashMap<u16, u16>,
    controls: HashMap<u16, ControlSlot>,
    clamp: bool,
    failures: Vec<FailureRule>,
    transfers: Vec<TransferRecord>,
}

/// Simulated camera answering on the control channel
///
/// Clones share state, so a test can keep one handle for inspection while the
/// code under test owns another.
#[derive(Debug, Clone)]
pub struct MockCamera {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCamera {
    /// Camera with the sample descriptors and factory ranges
    pub fn new() -> Self {
        let mut controls = HashMap::new();
        for (control, range) in [
            (CameraControl::Brightness, (-64, 64, 1, 0)),
            (CameraControl::Contrast, (0, 95, 1, 32)),
            (CameraControl::Hue, (-2000, 2000, 100, 0)),
        ] {
            let (min, max, step, default) = range;
            controls.insert(
                control.selector(),
                ControlSlot {
                    range: ControlRange {
                        min,
                        max,
                        step,
                        default,
                    },
                    current: default,
                },
            );
        }

        Self {
            state: Arc::new(Mutex::new(MockState {
                device_descriptor: sample_device_descriptor(),
                config_blob: sample_camera_blob(),
                alt_settings: HashMap::new(),
                controls,
                clamp: false,
                failures: Vec::new(),
                transfers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_config_blob(self, blob: Vec<u8>) -> Self {
        self.lock().config_blob = blob;
        self
    }

    pub fn with_device_descriptor(self, descriptor: Vec<u8>) -> Self {
        self.lock().device_descriptor = descriptor;
        self
    }

    pub fn with_range(self, control: CameraControl, range: ControlRange) -> Self {
        self.lock().controls.insert(
            control.selector(),
            ControlSlot {
                range,
                current: range.default,
            },
        );
        self
    }

    pub fn with_value(self, control: CameraControl, value: i32) -> Self {
        if let Some(slot) = self.lock().controls.get_mut(&control.selector()) {
            slot.current = value;
        }
        self
    }

    /// Clamp written values into the factory range, like many real devices
    pub fn with_clamping(self) -> Self {
        self.lock().clamp = true;
        self
    }

    /// Fail the next transfer with the given request code
    pub fn fail_on(&self, request: u8, error: TransportError) {
        self.fail_on_nth(request, 0, error);
    }

    /// Fail the transfer with the given request code after `skip` have succeeded
    pub fn fail_on_nth(&self, request: u8, skip: usize, error: TransportError) {
        self.lock().failures.push(FailureRule {
            request,
            skip,
            error,
        });
    }

    /// Every transfer attempted so far, in order
    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.lock().transfers.clone()
    }

    pub fn clear_transfers(&self) {
        self.lock().transfers.clear();
    }

    pub fn current_value(&self, control: CameraControl) -> Option<i32> {
        self.lock()
            .controls
            .get(&control.selector())
            .map(|slot| slot.current)
    }

    /// Alternate setting last selected on `interface`
    pub fn alt_setting(&self, interface: u16) -> Option<u16> {
        self.lock().alt_settings.get(&interface).copied()
    }
}

impl MockState {
    fn take_failure(&mut self, request: u8) -> Option<TransportError> {
        let pos = self.failures.iter().position(|f| f.request == request)?;
        let rule = &mut self.failures[pos];
        if rule.skip > 0 {
            rule.skip -= 1;
            return None;
        }
        Some(self.failures.remove(pos).error)
    }

    fn answer(&self, setup: &ControlSetup) -> Result<Vec<u8>, TransportError> {
        match (setup.kind, setup.request) {
            (RequestKind::Standard, request::GET_DESCRIPTOR) => match (setup.value >> 8) as u8 {
                descriptor_type::DEVICE => Ok(self.device_descriptor.clone()),
                descriptor_type::CONFIGURATION => Ok(self.config_blob.clone()),
                _ => Err(TransportError::Stall),
            },
            (RequestKind::Class, code) => {
                let slot = self
                    .controls
                    .get(&setup.value)
                    .ok_or(TransportError::Stall)?;
                let value = match code {
                    class_request::GET_CUR => slot.current,
                    class_request::GET_MIN => slot.range.min,
                    class_request::GET_MAX => slot.range.max,
                    class_request::GET_RES => slot.range.step,
                    class_request::GET_DEF => slot.range.default,
                    class_request::GET_LEN => return Ok(vec![2, 0]),
                    class_request::GET_INFO => return Ok(vec![0x03]),
                    _ => return Err(TransportError::Stall),
                };
                encode_value(value, 2).map_err(|_| TransportError::Stall)
            }
            _ => Err(TransportError::Stall),
        }
    }

    fn apply(&mut self, setup: &ControlSetup, payload: &[u8]) -> Result<usize, TransportError> {
        match (setup.kind, setup.request) {
            (RequestKind::Standard, request::SET_INTERFACE) => {
                self.alt_settings.insert(setup.index, setup.value);
                Ok(0)
            }
            (RequestKind::Class, class_request::SET_CUR) => {
                let clamp = self.clamp;
                let slot = self
                    .controls
                    .get_mut(&setup.value)
                    .ok_or(TransportError::Stall)?;
                let value = decode_value(payload).map_err(|_| TransportError::Stall)?;
                slot.current = if clamp {
                    value.clamp(slot.range.min, slot.range.max)
                } else {
                    value
                };
                Ok(payload.len())
            }
            _ => Err(TransportError::Stall),
        }
    }
}

impl ControlTransport for MockCamera {
    fn send(
        &mut self,
        setup: &ControlSetup,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        check_timeout(timeout)?;
        let mut state = self.lock();
        state.transfers.push(TransferRecord {
            direction: Direction::Out,
            setup: *setup,
            data: payload.to_vec(),
        });
        if let Some(error) = state.take_failure(setup.request) {
            return Err(error);
        }
        state.apply(setup, payload)
    }

    fn receive(
        &mut self,
        setup: &ControlSetup,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        check_timeout(timeout)?;
        let mut state = self.lock();
        state.transfers.push(TransferRecord {
            direction: Direction::In,
            setup: *setup,
            data: Vec::new(),
        });
        if let Some(error) = state.take_failure(setup.request) {
            return Err(error);
        }
        let answer = state.answer(setup)?;
        let n = answer.len().min(buf.len());
        buf[..n].copy_from_slice(&answer[..n]);
        if let Some(last) = state.transfers.last_mut() {
            last.data = answer[..n].to_vec();
        }
        Ok(n)
    }
}

/// Run an async operation with a timeout
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
