//! Control protocol client
//!
//! Issues the class-specific GET/SET requests for brightness, contrast and hue.
//! Every operation that touches a control value runs inside a stream bracket:
//! the streaming interface is switched to its zero-bandwidth alternate setting
//! first and back to the operational one last, since the device only answers
//! control requests reliably while idle.
//!
//! A failed transfer aborts the bracket where it happened. Streaming is not
//! re-enabled behind the caller's back; the resulting [`StreamState`] is kept
//! so callers can see what the device was left in.

use protocol::types::{
    OPERATIONAL_ALT_SETTING, ZERO_BANDWIDTH_ALT_SETTING, class_request, request,
};
use protocol::{
    BracketStage, CameraControl, CameraError, ControlCapability, ControlInfo, ControlRange,
    ControlSetup, ControlTransport, Recipient, RequestKind, Result, SetOutcome, StreamState,
    TransportError, decode_value, encode_value,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Largest control value on the wire
const SCRATCH_LEN: usize = 2;

/// Addressing and timing used for every request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    pub timeout: Duration,
    /// Unit answering control requests, placed in the high byte of `wIndex`
    pub unit_id: u8,
    pub control_interface: u8,
    pub streaming_interface: u8,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(protocol::types::DEFAULT_TIMEOUT_MS),
            unit_id: 3,
            control_interface: 0,
            streaming_interface: 1,
        }
    }
}

impl ClientSettings {
    /// `wIndex` of a class control request
    pub fn control_index(&self) -> u16 {
        u16::from(self.unit_id) << 8 | u16::from(self.control_interface)
    }
}

/// Control protocol state for one attached camera
pub struct ControlClient<T: ControlTransport> {
    transport: T,
    settings: ClientSettings,
    capability: ControlCapability,
    ranges: HashMap<CameraControl, ControlRange>,
    scratch: Vec<u8>,
    stream_state: StreamState,
}

impl<T: ControlTransport> ControlClient<T> {
    /// Create a client; allocates the scratch transfer buffer
    pub fn new(transport: T, settings: ClientSettings, capability: ControlCapability) -> Result<Self> {
        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(SCRATCH_LEN)
            .map_err(|_| CameraError::Allocation {
                what: "control scratch buffer".to_string(),
                size: SCRATCH_LEN,
            })?;

        Ok(Self {
            transport,
            settings,
            capability,
            ranges: HashMap::new(),
            scratch,
            stream_state: StreamState::Unknown,
        })
    }

    pub fn capability(&self) -> ControlCapability {
        self.capability
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Streaming state left behind by the last bracket
    pub fn stream_state(&self) -> StreamState {
        self.stream_state
    }

    /// Range already queried for `control`, if any
    pub fn cached_range(&self, control: CameraControl) -> Option<ControlRange> {
        self.ranges.get(&control).copied()
    }

    fn ensure_supported(&self, control: CameraControl) -> Result<()> {
        if self.capability.supports(control) {
            Ok(())
        } else {
            debug!("Rejecting {} request: not advertised by the device", control);
            Err(CameraError::Unsupported { control })
        }
    }

    fn control_setup(&self, code: u8, control: CameraControl) -> ControlSetup {
        ControlSetup::new(
            code,
            RequestKind::Class,
            Recipient::Interface,
            control.selector(),
            self.settings.control_index(),
        )
    }

    /// Switch the streaming interface to its operational or zero-bandwidth setting
    fn set_stream(&mut self, enable: bool) -> Result<()> {
        let (alt, stage, target) = if enable {
            (
                OPERATIONAL_ALT_SETTING,
                BracketStage::EnableStream,
                StreamState::Enabled,
            )
        } else {
            (
                ZERO_BANDWIDTH_ALT_SETTING,
                BracketStage::DisableStream,
                StreamState::Disabled,
            )
        };

        let setup = ControlSetup::new(
            request::SET_INTERFACE,
            RequestKind::Standard,
            Recipient::Interface,
            alt,
            u16::from(self.settings.streaming_interface),
        );

        match self.transport.send(&setup, &[], self.settings.timeout) {
            Ok(_) => {
                self.stream_state = target;
                Ok(())
            }
            Err(source) => {
                warn!("Stream gate failed at '{}': {}", stage, source);
                self.stream_state = StreamState::Unknown;
                Err(CameraError::Bracket { stage, source })
            }
        }
    }

    fn read_value(&mut self, code: u8, control: CameraControl, stage: BracketStage) -> Result<i32> {
        let width = control.wire_width();
        let setup = self.control_setup(code, control);

        self.scratch.clear();
        self.scratch.resize(width, 0);
        let n = self
            .transport
            .receive(&setup, &mut self.scratch[..width], self.settings.timeout)
            .map_err(|source| CameraError::Bracket { stage, source })?;

        if n < width {
            return Err(CameraError::Bracket {
                stage,
                source: TransportError::ShortTransfer {
                    expected: width,
                    actual: n,
                },
            });
        }

        decode_value(&self.scratch[..width])
            .map_err(|source| CameraError::RangeInvalid { control, source })
    }

    fn write_value(&mut self, control: CameraControl, value: i32, stage: BracketStage) -> Result<()> {
        let width = control.wire_width();
        let bytes = encode_value(value, width)
            .map_err(|source| CameraError::RangeInvalid { control, source })?;
        let setup = self.control_setup(class_request::SET_CUR, control);

        self.scratch.clear();
        self.scratch.extend_from_slice(&bytes);
        let n = self
            .transport
            .send(&setup, &self.scratch, self.settings.timeout)
            .map_err(|source| CameraError::Bracket { stage, source })?;

        if n < width {
            return Err(CameraError::Bracket {
                stage,
                source: TransportError::ShortTransfer {
                    expected: width,
                    actual: n,
                },
            });
        }
        Ok(())
    }

    /// Query the factory range of `control`, optionally resetting it to default
    ///
    /// Issues GET_MIN, GET_MAX, GET_RES and GET_DEF inside one stream bracket.
    /// With `reset`, the queried default is written back with SET_CUR as the
    /// last step before streaming is re-enabled. An out-of-order answer is
    /// reported as [`CameraError::RangeInvalid`] once the bracket is closed,
    /// and no reset is attempted for it.
    pub fn query_range(&mut self, control: CameraControl, reset: bool) -> Result<ControlRange> {
        self.ensure_supported(control)?;

        self.set_stream(false)?;
        let min = self.read_value(class_request::GET_MIN, control, BracketStage::QueryMin)?;
        let max = self.read_value(class_request::GET_MAX, control, BracketStage::QueryMax)?;
        let step = self.read_value(class_request::GET_RES, control, BracketStage::QueryResolution)?;
        let default = self.read_value(class_request::GET_DEF, control, BracketStage::QueryDefault)?;

        let range = ControlRange {
            min,
            max,
            step,
            default,
        };
        let validity = range.validate();

        if reset && validity.is_ok() {
            self.write_value(control, default, BracketStage::ResetDefault)?;
            debug!("Reset {} to default {}", control, default);
        }
        self.set_stream(true)?;

        validity.map_err(|source| CameraError::RangeInvalid { control, source })?;

        info!(
            "{} range: min={}, max={}, step={}, default={}",
            control, min, max, step, default
        );
        self.ranges.insert(control, range);
        Ok(range)
    }

    /// Factory range of `control`, queried on first use
    pub fn range(&mut self, control: CameraControl) -> Result<ControlRange> {
        self.ensure_supported(control)?;
        match self.ranges.get(&control) {
            Some(range) => Ok(*range),
            None => self.query_range(control, false),
        }
    }

    /// Read the current value of `control`
    pub fn get(&mut self, control: CameraControl) -> Result<i32> {
        self.ensure_supported(control)?;

        self.set_stream(false)?;
        let value = self.read_value(class_request::GET_CUR, control, BracketStage::ReadCurrent)?;
        self.set_stream(true)?;

        debug!("{} = {}", control, value);
        Ok(value)
    }

    /// Write `value` to `control`
    ///
    /// The bracket is disable, GET_CUR, SET_CUR, GET_CUR, enable. The read-back
    /// is not compared against the request for success: devices may clamp
    /// silently, so a mismatch is only logged and returned in the outcome.
    pub fn set(&mut self, control: CameraControl, value: i32) -> Result<SetOutcome> {
        self.ensure_supported(control)?;

        let range = self.range(control)?;
        if !range.contains(value) {
            return Err(CameraError::OutOfRange {
                control,
                value,
                min: range.min,
                max: range.max,
            });
        }

        self.set_stream(false)?;
        let previous = self.read_value(class_request::GET_CUR, control, BracketStage::ReadPrevious)?;
        self.write_value(control, value, BracketStage::Write)?;
        let current = self.read_value(class_request::GET_CUR, control, BracketStage::ReadCurrent)?;
        self.set_stream(true)?;

        let outcome = SetOutcome {
            control,
            requested: value,
            previous,
            current,
        };

        info!(
            "Set {}: requested={}, previous={}, current={}",
            control, value, previous, current
        );
        if !outcome.applied() {
            warn!(
                "{} read back {} after writing {}; device may have clamped it",
                control, current, value
            );
        }

        Ok(outcome)
    }

    /// Every supported control with its range
    pub fn controls(&mut self) -> Result<Vec<ControlInfo>> {
        let supported: Vec<CameraControl> = self.capability.supported().collect();
        supported
            .into_iter()
            .map(|control| {
                self.range(control)
                    .map(|range| ControlInfo { control, range })
            })
            .collect()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
