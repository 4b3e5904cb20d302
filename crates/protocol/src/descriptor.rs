//! Configuration descriptor forest
//!
//! A configuration descriptor read from the device is a flat sequence of
//! length-prefixed records. Nesting is implied by order: interfaces belong to
//! the configuration before them, endpoints and class-specific video records to
//! the interface before them.
//!
//! [`DescriptorForest::parse`] makes two passes over the blob. The size pass
//! tallies the four recognized record kinds so storage can be reserved exactly;
//! the materialize pass decodes each record and stamps its parent keys from a
//! cursor folded through the scan. Unrecognized record types are stepped over.
//! Any malformed record, or a child appearing before its parent, fails the
//! whole parse.

use crate::error::{LookupError, ParseError};
use crate::transport::Direction;
use crate::types::{descriptor_type, vc_subtype};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four record kinds kept in the forest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Configuration,
    Interface,
    Endpoint,
    VideoInterface,
}

impl RecordKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            descriptor_type::CONFIGURATION => Some(RecordKind::Configuration),
            descriptor_type::INTERFACE => Some(RecordKind::Interface),
            descriptor_type::ENDPOINT => Some(RecordKind::Endpoint),
            descriptor_type::VIDEO_INTERFACE => Some(RecordKind::VideoInterface),
            _ => None,
        }
    }

    pub const fn tag(self) -> u8 {
        match self {
            RecordKind::Configuration => descriptor_type::CONFIGURATION,
            RecordKind::Interface => descriptor_type::INTERFACE,
            RecordKind::Endpoint => descriptor_type::ENDPOINT,
            RecordKind::VideoInterface => descriptor_type::VIDEO_INTERFACE,
        }
    }

    /// Smallest `bLength` that holds every fixed field
    pub const fn min_len(self) -> usize {
        match self {
            RecordKind::Configuration => 9,
            RecordKind::Interface => 9,
            RecordKind::Endpoint => 7,
            RecordKind::VideoInterface => 3,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordKind::Configuration => "configuration",
            RecordKind::Interface => "interface",
            RecordKind::Endpoint => "endpoint",
            RecordKind::VideoInterface => "video-interface",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    pub length: u8,
    pub descriptor_type: u8,
    pub total_length: u16,
    pub interface_count: u8,
    pub configuration_value: u8,
    pub configuration_index: u8,
    pub attributes: u8,
    pub max_power: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceRecord {
    /// `configuration_value` of the enclosing configuration
    pub configuration_assoc: u8,
    pub length: u8,
    pub descriptor_type: u8,
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub endpoint_count: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_string_index: u8,
}

/// Endpoint transfer type (bits 0..1 of `bmAttributes`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub configuration_assoc: u8,
    /// `interface_number` of the enclosing interface
    pub parent_interface_assoc: u8,
    /// `alternate_setting` of the enclosing interface
    pub alternate_setting_assoc: u8,
    pub length: u8,
    pub descriptor_type: u8,
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointRecord {
    pub fn direction(&self) -> Direction {
        if self.endpoint_address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub fn transfer_kind(&self) -> TransferKind {
        match self.attributes & 0x03 {
            0 => TransferKind::Control,
            1 => TransferKind::Isochronous,
            2 => TransferKind::Bulk,
            _ => TransferKind::Interrupt,
        }
    }

    /// Per-transaction payload size, without the high-bandwidth multiplier bits
    pub fn packet_size(&self) -> u16 {
        self.max_packet_size & 0x07FF
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoInterfaceRecord {
    pub configuration_assoc: u8,
    pub parent_interface_assoc: u8,
    pub length: u8,
    pub descriptor_type: u8,
    pub subtype: u8,
    /// The `length - 3` bytes following the fixed header
    pub variable_data: Vec<u8>,
}

impl VideoInterfaceRecord {
    /// `bmControls` of a processing unit record
    ///
    /// The bitmap sits at bytes 5..=6 of the variable data (after unit id,
    /// source id, max multiplier and control size).
    pub fn processing_unit_controls(&self) -> Option<u16> {
        if self.subtype != vc_subtype::PROCESSING_UNIT {
            return None;
        }
        let bitmap = self.variable_data.get(5..7)?;
        Some(LittleEndian::read_u16(bitmap))
    }
}

/// Number of records of each kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub configurations: usize,
    pub interfaces: usize,
    pub endpoints: usize,
    pub video_interfaces: usize,
}

impl RecordCounts {
    fn bump(&mut self, kind: RecordKind) {
        match kind {
            RecordKind::Configuration => self.configurations += 1,
            RecordKind::Interface => self.interfaces += 1,
            RecordKind::Endpoint => self.endpoints += 1,
            RecordKind::VideoInterface => self.video_interfaces += 1,
        }
    }
}

/// One length-prefixed record as it sits in the blob
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    pub offset: usize,
    pub tag: u8,
    pub bytes: &'a [u8],
}

/// Iterator over the length-prefixed records of a blob
///
/// Yields an error and then stops on a record whose length is zero, shorter
/// than its two-byte header, or runs past the end of the blob.
pub struct RecordWalker<'a> {
    blob: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> RecordWalker<'a> {
    pub fn new(blob: &'a [u8]) -> Self {
        Self {
            blob,
            offset: 0,
            failed: false,
        }
    }

    /// Bytes successfully stepped over so far
    pub fn consumed(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for RecordWalker<'a> {
    type Item = Result<RawRecord<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.blob.len() {
            return None;
        }

        let offset = self.offset;
        let remaining = self.blob.len() - offset;
        let length = self.blob[offset] as usize;

        let error = if length == 0 {
            Some(ParseError::ZeroLength { offset })
        } else if length < 2 {
            Some(ParseError::HeaderTooShort { offset, length })
        } else if length > remaining {
            Some(ParseError::Truncated {
                offset,
                length,
                remaining,
            })
        } else {
            None
        };

        if let Some(error) = error {
            self.failed = true;
            return Some(Err(error));
        }

        let bytes = &self.blob[offset..offset + length];
        self.offset += length;

        Some(Ok(RawRecord {
            offset,
            tag: bytes[1],
            bytes,
        }))
    }
}

/// Alternate setting chosen for streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingSelection {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub endpoint_address: u8,
    pub packet_size: u16,
}

/// Parent keys threaded through the materialize pass
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    configuration: Option<u8>,
    interface: Option<(u8, u8)>,
}

/// All recognized records of one configuration descriptor blob
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorForest {
    configurations: Vec<ConfigurationRecord>,
    interfaces: Vec<InterfaceRecord>,
    endpoints: Vec<EndpointRecord>,
    video_interfaces: Vec<VideoInterfaceRecord>,
}

impl DescriptorForest {
    /// Build the forest from one configuration descriptor blob
    pub fn parse(blob: &[u8]) -> Result<Self, ParseError> {
        if blob.is_empty() {
            return Err(ParseError::Empty);
        }

        let (counts, sized) = size_pass(blob)?;

        let mut forest = Self::with_capacity(&counts)?;
        let mut walker = RecordWalker::new(blob);
        walker
            .by_ref()
            .try_fold(Cursor::default(), |cursor, record| {
                forest.materialize(cursor, &record?)
            })?;

        let materialized = walker.consumed();
        if sized != blob.len() || materialized != sized || forest.counts() != counts {
            return Err(ParseError::PassMismatch {
                sized,
                materialized,
            });
        }

        Ok(forest)
    }

    fn with_capacity(counts: &RecordCounts) -> Result<Self, ParseError> {
        let mut forest = Self::default();
        forest
            .configurations
            .try_reserve_exact(counts.configurations)
            .map_err(|_| ParseError::Allocation {
                kind: RecordKind::Configuration,
                count: counts.configurations,
            })?;
        forest
            .interfaces
            .try_reserve_exact(counts.interfaces)
            .map_err(|_| ParseError::Allocation {
                kind: RecordKind::Interface,
                count: counts.interfaces,
            })?;
        forest
            .endpoints
            .try_reserve_exact(counts.endpoints)
            .map_err(|_| ParseError::Allocation {
                kind: RecordKind::Endpoint,
                count: counts.endpoints,
            })?;
        forest
            .video_interfaces
            .try_reserve_exact(counts.video_interfaces)
            .map_err(|_| ParseError::Allocation {
                kind: RecordKind::VideoInterface,
                count: counts.video_interfaces,
            })?;
        Ok(forest)
    }

    /// Decode one record and return the cursor for the next
    fn materialize(&mut self, cursor: Cursor, record: &RawRecord<'_>) -> Result<Cursor, ParseError> {
        let Some(kind) = RecordKind::from_tag(record.tag) else {
            return Ok(cursor);
        };

        let b = record.bytes;
        if b.len() < kind.min_len() {
            return Err(ParseError::ShortRecord {
                kind,
                offset: record.offset,
                length: b.len(),
                min: kind.min_len(),
            });
        }

        match kind {
            RecordKind::Configuration => {
                let config = ConfigurationRecord {
                    length: b[0],
                    descriptor_type: b[1],
                    total_length: LittleEndian::read_u16(&b[2..4]),
                    interface_count: b[4],
                    configuration_value: b[5],
                    configuration_index: b[6],
                    attributes: b[7],
                    max_power: b[8],
                };
                self.configurations.push(config);
                Ok(Cursor {
                    configuration: Some(config.configuration_value),
                    interface: None,
                })
            }
            RecordKind::Interface => {
                let configuration_assoc = cursor.configuration.ok_or(ParseError::Orphan {
                    kind,
                    parent: RecordKind::Configuration,
                    offset: record.offset,
                })?;
                let interface = InterfaceRecord {
                    configuration_assoc,
                    length: b[0],
                    descriptor_type: b[1],
                    interface_number: b[2],
                    alternate_setting: b[3],
                    endpoint_count: b[4],
                    interface_class: b[5],
                    interface_subclass: b[6],
                    interface_protocol: b[7],
                    interface_string_index: b[8],
                };
                self.interfaces.push(interface);
                Ok(Cursor {
                    interface: Some((interface.interface_number, interface.alternate_setting)),
                    ..cursor
                })
            }
            RecordKind::Endpoint => {
                let (configuration_assoc, (interface_number, alternate_setting)) =
                    parents(cursor, kind, record.offset)?;
                self.endpoints.push(EndpointRecord {
                    configuration_assoc,
                    parent_interface_assoc: interface_number,
                    alternate_setting_assoc: alternate_setting,
                    length: b[0],
                    descriptor_type: b[1],
                    endpoint_address: b[2],
                    attributes: b[3],
                    max_packet_size: LittleEndian::read_u16(&b[4..6]),
                    interval: b[6],
                });
                Ok(cursor)
            }
            RecordKind::VideoInterface => {
                let (configuration_assoc, (interface_number, _)) =
                    parents(cursor, kind, record.offset)?;
                let tail = &b[3..];
                let mut variable_data = Vec::new();
                variable_data
                    .try_reserve_exact(tail.len())
                    .map_err(|_| ParseError::Allocation {
                        kind,
                        count: tail.len(),
                    })?;
                variable_data.extend_from_slice(tail);
                self.video_interfaces.push(VideoInterfaceRecord {
                    configuration_assoc,
                    parent_interface_assoc: interface_number,
                    length: b[0],
                    descriptor_type: b[1],
                    subtype: b[2],
                    variable_data,
                });
                Ok(cursor)
            }
        }
    }

    pub fn counts(&self) -> RecordCounts {
        RecordCounts {
            configurations: self.configurations.len(),
            interfaces: self.interfaces.len(),
            endpoints: self.endpoints.len(),
            video_interfaces: self.video_interfaces.len(),
        }
    }

    pub fn configurations(&self) -> &[ConfigurationRecord] {
        &self.configurations
    }

    pub fn interfaces(&self) -> &[InterfaceRecord] {
        &self.interfaces
    }

    pub fn endpoints(&self) -> &[EndpointRecord] {
        &self.endpoints
    }

    pub fn video_interfaces(&self) -> &[VideoInterfaceRecord] {
        &self.video_interfaces
    }

    pub fn configuration_by_index(&self, index: usize) -> Result<&ConfigurationRecord, LookupError> {
        self.configurations
            .get(index)
            .ok_or_else(|| LookupError::NotFound {
                kind: RecordKind::Configuration,
                key: format!("index {}", index),
            })
    }

    pub fn interface_by_index(&self, index: usize) -> Result<&InterfaceRecord, LookupError> {
        self.interfaces
            .get(index)
            .ok_or_else(|| LookupError::NotFound {
                kind: RecordKind::Interface,
                key: format!("index {}", index),
            })
    }

    /// First endpoint of the given interface/alternate setting
    ///
    /// An alternate setting commonly carries several endpoints; this returns the
    /// first one in descriptor order. Use [`Self::endpoints_for`] to see all of
    /// them or [`Self::endpoint_by_direction`] to pick one by direction.
    pub fn endpoint_by(
        &self,
        parent_interface: u8,
        alternate_setting: u8,
    ) -> Result<&EndpointRecord, LookupError> {
        self.endpoints_for(parent_interface, alternate_setting)
            .next()
            .ok_or_else(|| LookupError::NotFound {
                kind: RecordKind::Endpoint,
                key: format!("interface {} alt {}", parent_interface, alternate_setting),
            })
    }

    pub fn endpoints_for(
        &self,
        parent_interface: u8,
        alternate_setting: u8,
    ) -> impl Iterator<Item = &EndpointRecord> + '_ {
        self.endpoints.iter().filter(move |ep| {
            ep.parent_interface_assoc == parent_interface
                && ep.alternate_setting_assoc == alternate_setting
        })
    }

    pub fn endpoint_by_direction(
        &self,
        parent_interface: u8,
        alternate_setting: u8,
        direction: Direction,
    ) -> Result<&EndpointRecord, LookupError> {
        self.endpoints_for(parent_interface, alternate_setting)
            .find(|ep| ep.direction() == direction)
            .ok_or_else(|| LookupError::NotFound {
                kind: RecordKind::Endpoint,
                key: format!(
                    "interface {} alt {} direction {:?}",
                    parent_interface, alternate_setting, direction
                ),
            })
    }

    /// First video-interface record with the given parent and subtype
    pub fn video_interface_by(
        &self,
        parent_interface: u8,
        subtype: u8,
    ) -> Result<&VideoInterfaceRecord, LookupError> {
        self.video_interfaces_for(parent_interface, subtype)
            .next()
            .ok_or_else(|| LookupError::NotFound {
                kind: RecordKind::VideoInterface,
                key: format!("interface {} subtype {:#04x}", parent_interface, subtype),
            })
    }

    pub fn video_interfaces_for(
        &self,
        parent_interface: u8,
        subtype: u8,
    ) -> impl Iterator<Item = &VideoInterfaceRecord> + '_ {
        self.video_interfaces
            .iter()
            .filter(move |vi| vi.parent_interface_assoc == parent_interface && vi.subtype == subtype)
    }

    /// Every alternate setting record of one interface number
    pub fn alternate_settings(&self, interface_number: u8) -> impl Iterator<Item = &InterfaceRecord> + '_ {
        self.interfaces
            .iter()
            .filter(move |i| i.interface_number == interface_number)
    }

    /// Alternate setting of `interface_number` with an isochronous IN endpoint
    /// of exactly `packet_size` bytes
    pub fn find_streaming_setting(
        &self,
        interface_number: u8,
        packet_size: u16,
    ) -> Option<StreamingSelection> {
        self.alternate_settings(interface_number).find_map(|alt| {
            self.endpoints_for(interface_number, alt.alternate_setting)
                .find(|ep| {
                    ep.direction() == Direction::In
                        && ep.transfer_kind() == TransferKind::Isochronous
                        && ep.packet_size() == packet_size
                })
                .map(|ep| StreamingSelection {
                    interface_number,
                    alternate_setting: alt.alternate_setting,
                    endpoint_address: ep.endpoint_address,
                    packet_size: ep.packet_size(),
                })
        })
    }
}

fn size_pass(blob: &[u8]) -> Result<(RecordCounts, usize), ParseError> {
    let mut counts = RecordCounts::default();
    let mut walker = RecordWalker::new(blob);
    for record in walker.by_ref() {
        if let Some(kind) = RecordKind::from_tag(record?.tag) {
            counts.bump(kind);
        }
    }
    Ok((counts, walker.consumed()))
}

fn parents(cursor: Cursor, kind: RecordKind, offset: usize) -> Result<(u8, (u8, u8)), ParseError> {
    match (cursor.configuration, cursor.interface) {
        (Some(configuration), Some(interface)) => Ok((configuration, interface)),
        _ => Err(ParseError::Orphan {
            kind,
            parent: RecordKind::Interface,
            offset,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: [u8; 9] = [9, 0x02, 0x2E, 0x00, 2, 1, 0, 0x80, 250];
    const INTERFACE_0: [u8; 9] = [9, 0x04, 0, 0, 1, 0x0E, 0x01, 0x00, 2];
    const ENDPOINT_83: [u8; 7] = [7, 0x05, 0x83, 0x03, 0x10, 0x00, 6];
    const PROCESSING_UNIT: [u8; 11] = [11, 0x24, 0x05, 2, 1, 0, 0, 2, 0x07, 0x00, 0];
    const INTERFACE_1_ALT_1: [u8; 9] = [9, 0x04, 1, 1, 1, 0x0E, 0x02, 0x00, 0];

    fn blob(parts: &[&[u8]]) -> Vec<u8> {
        parts.concat()
    }

    #[test]
    fn test_parse_minimal() {
        let data = blob(&[&CONFIG, &INTERFACE_0, &PROCESSING_UNIT, &ENDPOINT_83]);
        let forest = DescriptorForest::parse(&data).unwrap();

        let counts = forest.counts();
        assert_eq!(counts.configurations, 1);
        assert_eq!(counts.interfaces, 1);
        assert_eq!(counts.endpoints, 1);
        assert_eq!(counts.video_interfaces, 1);

        let config = forest.configuration_by_index(0).unwrap();
        assert_eq!(config.total_length, 0x002E);
        assert_eq!(config.configuration_value, 1);

        let ep = forest.endpoint_by(0, 0).unwrap();
        assert_eq!(ep.endpoint_address, 0x83);
        assert_eq!(ep.max_packet_size, 16);
        assert_eq!(ep.transfer_kind(), TransferKind::Interrupt);
        assert_eq!(ep.configuration_assoc, 1);

        let pu = forest.video_interface_by(0, vc_subtype::PROCESSING_UNIT).unwrap();
        assert_eq!(pu.variable_data.len(), 8);
        assert_eq!(pu.processing_unit_controls(), Some(0x0007));
    }

    #[test]
    fn test_unknown_types_are_skipped() {
        let iad: [u8; 8] = [8, 0x0B, 0, 2, 0x0E, 0x03, 0x00, 2];
        let data = blob(&[&CONFIG, &iad, &INTERFACE_0]);
        let forest = DescriptorForest::parse(&data).unwrap();
        assert_eq!(forest.counts().interfaces, 1);
    }

    #[test]
    fn test_zero_length_fails() {
        let data = blob(&[&CONFIG, &[0, 0x04, 0, 0]]);
        assert_eq!(
            DescriptorForest::parse(&data),
            Err(ParseError::ZeroLength { offset: 9 })
        );
    }

    #[test]
    fn test_truncated_fails() {
        let data = blob(&[&CONFIG, &INTERFACE_0[..5]]);
        assert_eq!(
            DescriptorForest::parse(&data),
            Err(ParseError::Truncated {
                offset: 9,
                length: 9,
                remaining: 5
            })
        );
    }

    #[test]
    fn test_new_configuration_resets_interface() {
        let second_config: [u8; 9] = [9, 0x02, 0x12, 0x00, 1, 2, 0, 0x80, 250];
        let data = blob(&[&CONFIG, &INTERFACE_0, &second_config, &ENDPOINT_83]);
        assert!(matches!(
            DescriptorForest::parse(&data),
            Err(ParseError::Orphan {
                kind: RecordKind::Endpoint,
                ..
            })
        ));
    }

    #[test]
    fn test_lookup_out_of_bounds() {
        let data = blob(&[&CONFIG, &INTERFACE_0]);
        let forest = DescriptorForest::parse(&data).unwrap();
        assert!(forest.configuration_by_index(1).is_err());
        assert!(forest.interface_by_index(1).is_err());
        assert!(forest.endpoint_by(0, 0).is_err());
    }

    #[test]
    fn test_find_streaming_setting() {
        let iso_small: [u8; 7] = [7, 0x05, 0x81, 0x05, 0xA0, 0x00, 1];
        let iso_large: [u8; 7] = [7, 0x05, 0x81, 0x05, 0xFF, 0x03, 1];
        let alt_2: [u8; 9] = [9, 0x04, 1, 2, 1, 0x0E, 0x02, 0x00, 0];
        let data = blob(&[&CONFIG, &INTERFACE_1_ALT_1, &iso_small, &alt_2, &iso_large]);
        let forest = DescriptorForest::parse(&data).unwrap();

        let selection = forest.find_streaming_setting(1, 1023).unwrap();
        assert_eq!(selection.alternate_setting, 2);
        assert_eq!(selection.endpoint_address, 0x81);
        assert!(forest.find_streaming_setting(1, 3072).is_none());
    }
}
