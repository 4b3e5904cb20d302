//! Control transfer contract
//!
//! Defines the setup packet fields a caller supplies for a control transfer and
//! the [`ControlTransport`] trait implemented by the real USB backend and by
//! test doubles. The direction bit is never supplied by the caller: `send`
//! always produces a host-to-device request type and `receive` always a
//! device-to-host one.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Data phase direction (bit 7 of `bmRequestType`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

impl Direction {
    pub const fn bits(self) -> u8 {
        match self {
            Direction::Out => 0x00,
            Direction::In => 0x80,
        }
    }
}

/// Request type (bits 5..6 of `bmRequestType`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
}

impl RequestKind {
    pub const fn bits(self) -> u8 {
        match self {
            RequestKind::Standard => 0x00,
            RequestKind::Class => 0x01 << 5,
            RequestKind::Vendor => 0x02 << 5,
        }
    }
}

/// Recipient (bits 0..4 of `bmRequestType`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
}

impl Recipient {
    pub const fn bits(self) -> u8 {
        match self {
            Recipient::Device => 0x00,
            Recipient::Interface => 0x01,
            Recipient::Endpoint => 0x02,
        }
    }
}

/// Setup fields of a control transfer, minus direction and length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlSetup {
    pub request: u8,
    pub kind: RequestKind,
    pub recipient: Recipient,
    pub value: u16,
    pub index: u16,
}

impl ControlSetup {
    pub const fn new(
        request: u8,
        kind: RequestKind,
        recipient: Recipient,
        value: u16,
        index: u16,
    ) -> Self {
        Self {
            request,
            kind,
            recipient,
            value,
            index,
        }
    }

    /// Full `bmRequestType` byte for the given direction
    pub const fn request_type(&self, direction: Direction) -> u8 {
        direction.bits() | self.kind.bits() | self.recipient.bits()
    }
}

/// Wire-level transfer failure
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TransportError {
    #[error("transfer timed out")]
    Timeout,

    #[error("device stalled the request")]
    Stall,

    #[error("device disconnected")]
    Disconnected,

    #[error("device or interface busy")]
    Busy,

    #[error("access denied")]
    Access,

    #[error("device sent more data than requested")]
    Overflow,

    #[error("I/O error")]
    Io,

    #[error("timeout must be between 1 ms and {} ms", MAX_TIMEOUT_MS)]
    InvalidTimeout,

    #[error("short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("transport error: {message}")]
    Other { message: String },
}

/// Bidirectional control transfer channel to one device
///
/// Implementations issue exactly one transfer per call and never retry.
pub trait ControlTransport {
    /// Host-to-device transfer. Returns the number of bytes written.
    fn send(
        &mut self,
        setup: &ControlSetup,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Device-to-host transfer into `buf`. Returns the number of bytes read.
    fn receive(
        &mut self,
        setup: &ControlSetup,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;
}

impl<T: ControlTransport + ?Sized> ControlTransport for Box<T> {
    fn send(
        &mut self,
        setup: &ControlSetup,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        (**self).send(setup, payload, timeout)
    }

    fn receive(
        &mut self,
        setup: &ControlSetup,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        (**self).receive(setup, buf, timeout)
    }
}

/// Longest timeout libusb can express; its timeout field is an unsigned 32-bit ms count
pub const MAX_TIMEOUT_MS: u64 = u32::MAX as u64;

/// Reject timeouts libusb would turn into "wait forever"
///
/// libusb counts whole milliseconds and treats 0 as no timeout, so anything
/// below 1 ms, or too large for its 32-bit field, is refused.
pub fn check_timeout(timeout: Duration) -> Result<(), TransportError> {
    let millis = timeout.as_millis();
    if millis == 0 || millis > u128::from(MAX_TIMEOUT_MS) {
        Err(TransportError::InvalidTimeout)
    } else {
        Ok(())
    }
}
