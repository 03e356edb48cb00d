//! Wire format for commands exchanged between the two endpoints.
//!
//! A command is a flat JSON object with a mandatory `action` string and,
//! when the companion pushes a new threshold, a numeric `bpmThreshold`:
//!
//! ```text
//! {"action":"alarmButtonPressed"}
//! {"action":"buttonPressed","bpmThreshold":125}
//! ```
//!
//! Commands carry no sequence number. The link may drop, duplicate or
//! reorder them, and receivers handle every command idempotently.
//!
//! On stream transports each command is one line (see [`CommandCodec`]).

use std::io;
use std::str::FromStr;

use bytes::BytesMut;
use serde_json::{Map, Value};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

pub const ACTION_KEY: &str = "action";
pub const BPM_THRESHOLD_KEY: &str = "bpmThreshold";

/// Longest accepted line, newline excluded.
pub const MAX_FRAME_LEN: usize = 4096;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
pub enum Action {
    /// Liveness check; answered with [`Action::Ack`].
    #[strum(serialize = "buttonPressed")]
    Ping,

    /// The sender's alarm started ringing.
    #[strum(serialize = "alarmButtonPressed")]
    AlarmFired,

    /// The sender's alarm stopped ringing.
    #[strum(serialize = "stopAlarm")]
    StopAlarm,

    #[strum(serialize = "ack")]
    Ack,
}

pub type Payload = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("command is not a JSON object")]
    NotAnObject,

    #[error("command has no string `action` field")]
    MissingAction,

    #[error("unrecognized action {0:?}")]
    UnknownAction(String),

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("frame exceeds the size limit")]
    FrameTooLong,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub action: Action,
    /// Every field other than `action`.
    pub payload: Option<Payload>,
}

impl Command {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            payload: None,
        }
    }

    pub fn ping() -> Self {
        Self::new(Action::Ping)
    }

    pub fn alarm_fired() -> Self {
        Self::new(Action::AlarmFired)
    }

    pub fn stop_alarm() -> Self {
        Self::new(Action::StopAlarm)
    }

    pub fn ack() -> Self {
        Self::new(Action::Ack)
    }

    /// A ping carrying a new threshold for the peer.
    pub fn configure(bpm_threshold: u32) -> Self {
        let mut payload = Payload::new();
        payload.insert(BPM_THRESHOLD_KEY.into(), Value::from(bpm_threshold));
        Self {
            action: Action::Ping,
            payload: Some(payload),
        }
    }

    /// The `bpmThreshold` field, if present and a positive number.
    ///
    /// Fractional values are rounded to the nearest beat.
    pub fn bpm_threshold(&self) -> Option<u32> {
        let value = self.payload.as_ref()?.get(BPM_THRESHOLD_KEY)?;
        if let Some(bpm) = value.as_u64() {
            return u32::try_from(bpm).ok().filter(|&bpm| bpm > 0);
        }
        let bpm = value.as_f64()?.round();
        (bpm >= 1.0 && bpm <= f64::from(u32::MAX)).then_some(bpm as u32)
    }

    pub fn to_wire(&self) -> String {
        let mut object = self.payload.clone().unwrap_or_default();
        let action: &'static str = self.action.into();
        object.insert(ACTION_KEY.into(), Value::from(action));
        Value::Object(object).to_string()
    }

    pub fn from_wire(text: &str) -> Result<Self, ProtocolError> {
        let Value::Object(mut object) = serde_json::from_str::<Value>(text)? else {
            return Err(ProtocolError::NotAnObject);
        };

        let action = match object.remove(ACTION_KEY) {
            Some(Value::String(action)) => {
                Action::from_str(&action).map_err(|_| ProtocolError::UnknownAction(action))?
            }
            _ => return Err(ProtocolError::MissingAction),
        };

        Ok(Self {
            action,
            payload: (!object.is_empty()).then_some(object),
        })
    }
}

/// Newline-delimited JSON framing for stream transports.
///
/// Line splitting is [`LinesCodec`]'s. Bad lines decode to `Some(Err(_))`
/// rather than failing the stream, so a single bad frame from the peer is
/// dropped and the link survives.
#[derive(Debug)]
pub struct CommandCodec {
    lines: LinesCodec,
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_FRAME_LEN),
        }
    }
}

impl CommandCodec {
    /// Turn a decoded line into a frame; `None` for blank lines.
    fn frame(line: &str) -> Option<Result<Command, ProtocolError>> {
        let text = line.trim();
        (!text.is_empty()).then(|| Command::from_wire(text))
    }

    /// Keep the stream alive for errors confined to one line.
    fn recover(err: LinesCodecError) -> Result<Option<Result<Command, ProtocolError>>, io::Error> {
        match err {
            LinesCodecError::MaxLineLengthExceeded => Ok(Some(Err(ProtocolError::FrameTooLong))),
            LinesCodecError::Io(e) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Err(ProtocolError::InvalidUtf8)))
            }
            LinesCodecError::Io(e) => Err(e),
        }
    }
}

impl Decoder for CommandCodec {
    type Item = Result<Command, ProtocolError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.lines.decode(src) {
                Ok(Some(line)) => {
                    if let Some(frame) = Self::frame(&line) {
                        return Ok(Some(frame));
                    }
                }
                Ok(None) => return Ok(None),
                Err(e) => return Self::recover(e),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.lines.decode_eof(src) {
                Ok(Some(line)) => {
                    if let Some(frame) = Self::frame(&line) {
                        return Ok(Some(frame));
                    }
                }
                Ok(None) => return Ok(None),
                Err(e) => return Self::recover(e),
            }
        }
    }
}

impl Encoder<Command> for CommandCodec {
    type Error = io::Error;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.lines
            .encode(command.to_wire(), dst)
            .map_err(|e| match e {
                LinesCodecError::Io(e) => e,
                other => io::Error::other(other),
            })
    }
}
