//! Protocol error types

use crate::descriptor::RecordKind;
use crate::transport::TransportError;
use crate::types::{BracketStage, CameraControl};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Malformed descriptor blob
///
/// Parsing never returns a partially built forest.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ParseError {
    #[error("descriptor blob is empty")]
    Empty,

    #[error("record at offset {offset} has zero length")]
    ZeroLength { offset: usize },

    #[error("record at offset {offset} declares length {length}, shorter than its header")]
    HeaderTooShort { offset: usize, length: usize },

    #[error("record at offset {offset} declares {length} bytes but only {remaining} remain")]
    Truncated {
        offset: usize,
        length: usize,
        remaining: usize,
    },

    #[error("{kind} record at offset {offset} is {length} bytes, needs at least {min}")]
    ShortRecord {
        kind: RecordKind,
        offset: usize,
        length: usize,
        min: usize,
    },

    #[error("{kind} record at offset {offset} appears before any {parent} record")]
    Orphan {
        kind: RecordKind,
        parent: RecordKind,
        offset: usize,
    },

    #[error("size pass and materialize pass disagree: {sized} vs {materialized} bytes")]
    PassMismatch { sized: usize, materialized: usize },

    #[error("could not allocate storage for {count} {kind} records")]
    Allocation { kind: RecordKind, count: usize },
}

/// Forest lookup miss
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LookupError {
    #[error("no {kind} record matches {key}")]
    NotFound { kind: RecordKind, key: String },
}

/// Control range or value violating the class protocol
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RangeError {
    #[error("range out of order: min {min}, default {default}, max {max}")]
    OrderViolation { min: i32, max: i32, default: i32 },

    #[error("step must be at least 1, got {step}")]
    ZeroStep { step: i32 },

    #[error("unsupported control value width {width}")]
    BadWidth { width: usize },

    #[error("value {value} does not fit in {width} byte(s)")]
    Unrepresentable { value: i32, width: usize },
}

/// Any failure of a camera operation, scoped to one device instance
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CameraError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{stage} failed: {source}")]
    Bracket {
        stage: BracketStage,
        source: TransportError,
    },

    #[error("descriptor parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("descriptor lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("{control} is not supported by this device")]
    Unsupported { control: CameraControl },

    #[error("{control} range invalid: {source}")]
    RangeInvalid {
        control: CameraControl,
        source: RangeError,
    },

    #[error("{control} value {value} outside {min}..={max}")]
    OutOfRange {
        control: CameraControl,
        value: i32,
        min: i32,
        max: i32,
    },

    #[error("could not allocate {size} bytes for {what}")]
    Allocation { what: String, size: usize },

    #[error("unsupported pixel format: {0}")]
    InvalidFormat(String),

    #[error("interface did not answer the verification request")]
    WrongInterface,

    #[error("no alternate setting offers {expected}-byte isochronous packets")]
    NoMatchingAltSetting { expected: u16 },

    #[error("framework registration failed: {0}")]
    Registration(String),

    #[error("device is not attached")]
    NotAttached,
}

pub type Result<T> = std::result::Result<T, CameraError>;
