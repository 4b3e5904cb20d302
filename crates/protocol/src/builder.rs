//! Descriptor blob encoder
//!
//! Produces configuration descriptor blobs in the same layout a device returns,
//! for simulated devices and fixtures.

use crate::types::{DEVICE_DESCRIPTOR_LEN, descriptor_type};

/// Appends records in stream order and patches `wTotalLength` on build
#[derive(Debug, Clone, Default)]
pub struct DescriptorBlobBuilder {
    bytes: Vec<u8>,
    config_offsets: Vec<usize>,
}

impl DescriptorBlobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configuration(mut self, configuration_value: u8, interface_count: u8) -> Self {
        self.config_offsets.push(self.bytes.len());
        self.bytes.extend_from_slice(&[
            9,
            descriptor_type::CONFIGURATION,
            0,
            0,
            interface_count,
            configuration_value,
            0,
            0x80,
            250,
        ]);
        self
    }

    pub fn interface(
        mut self,
        interface_number: u8,
        alternate_setting: u8,
        endpoint_count: u8,
        interface_class: u8,
        interface_subclass: u8,
    ) -> Self {
        self.bytes.extend_from_slice(&[
            9,
            descriptor_type::INTERFACE,
            interface_number,
            alternate_setting,
            endpoint_count,
            interface_class,
            interface_subclass,
            0,
            0,
        ]);
        self
    }

    pub fn endpoint(mut self, address: u8, attributes: u8, max_packet_size: u16, interval: u8) -> Self {
        let [lo, hi] = max_packet_size.to_le_bytes();
        self.bytes.extend_from_slice(&[
            7,
            descriptor_type::ENDPOINT,
            address,
            attributes,
            lo,
            hi,
            interval,
        ]);
        self
    }

    /// Class-specific interface record; `data` follows the 3-byte header
    pub fn video_interface(mut self, subtype: u8, data: &[u8]) -> Self {
        self.bytes.push((data.len() + 3) as u8);
        self.bytes.push(descriptor_type::VIDEO_INTERFACE);
        self.bytes.push(subtype);
        self.bytes.extend_from_slice(data);
        self
    }

    /// Bytes copied as-is, including any length prefix
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn build(mut self) -> Vec<u8> {
        let ends = self
            .config_offsets
            .iter()
            .skip(1)
            .copied()
            .chain(std::iter::once(self.bytes.len()))
            .collect::<Vec<_>>();
        for (start, end) in self.config_offsets.iter().zip(ends) {
            let [lo, hi] = ((end - start) as u16).to_le_bytes();
            self.bytes[start + 2] = lo;
            self.bytes[start + 3] = hi;
        }
        self.bytes
    }
}

/// Standard 18-byte device descriptor for the given vendor/product pair
pub fn device_descriptor(vendor_id: u16, product_id: u16) -> [u8; DEVICE_DESCRIPTOR_LEN] {
    let [vid_lo, vid_hi] = vendor_id.to_le_bytes();
    let [pid_lo, pid_hi] = product_id.to_le_bytes();
    [
        DEVICE_DESCRIPTOR_LEN as u8,
        descriptor_type::DEVICE,
        0x00,
        0x02,
        0xEF,
        0x02,
        0x01,
        64,
        vid_lo,
        vid_hi,
        pid_lo,
        pid_hi,
        0x00,
        0x01,
        1,
        2,
        0,
        1,
    ]
}
