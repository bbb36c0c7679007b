use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::radio::{Frame, MAX_FRAME_LEN};
use crate::telemetry::{self, DecodeError, TelemetryReading};

/// Length of the frequency-switch command and of its echo:
/// tag, command code, f32 frequency.
pub const SWITCH_FRAME_LEN: usize = 6;

pub type SwitchFrame = ArrayVec<u8, SWITCH_FRAME_LEN>;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketType {
    Ping = 1,
    AckPong = 2,
    SensorData = 3,
    Command = 4,
}

impl TryFrom<u8> for PacketType {
    type Error = RouterError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(PacketType::Ping),
            2 => Ok(PacketType::AckPong),
            3 => Ok(PacketType::SensorData),
            4 => Ok(PacketType::Command),
            other => Err(RouterError::UnknownType(other)),
        }
    }
}

/// Second byte of COMMAND and ACK_PONG frames.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandCode {
    SwitchRadioFrequency = 0x01,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouterAction {
    Telemetry(TelemetryReading),
    /// COMMAND payload, tag stripped.
    Command(Frame),
    Ping,
    /// ACK_PONG payload, tag stripped.
    AckPong(Frame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("empty frame")]
    Empty,
    #[error("frame of {0} bytes exceeds the radio payload limit")]
    Oversize(usize),
    #[error("unrecognized packet type {0:#04x}")]
    UnknownType(u8),
    #[error("sensor data rejected: {0}")]
    Decode(#[from] DecodeError),
}

/// Classifies one inbound frame by its type tag. Stateless: the same frame
/// always routes to the same action.
pub fn route(frame: &[u8]) -> Result<RouterAction, RouterError> {
    let (&tag, payload) = frame.split_first().ok_or(RouterError::Empty)?;
    if frame.len() > MAX_FRAME_LEN {
        return Err(RouterError::Oversize(frame.len()));
    }

    match PacketType::try_from(tag)? {
        PacketType::SensorData => Ok(RouterAction::Telemetry(telemetry::decode(payload)?)),
        PacketType::Command => Ok(RouterAction::Command(payload_frame(payload)?)),
        PacketType::Ping => Ok(RouterAction::Ping),
        PacketType::AckPong => Ok(RouterAction::AckPong(payload_frame(payload)?)),
    }
}

fn payload_frame(payload: &[u8]) -> Result<Frame, RouterError> {
    Frame::from_slice(payload).map_err(|()| RouterError::Oversize(payload.len() + 1))
}

/// Running counts of routed frames, reported in station state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RouterStats {
    pub frames: u32,
    pub telemetry: u32,
    pub commands: u32,
    pub pings: u32,
    pub acks: u32,
    pub dropped: u32,
}

#[derive(Debug, Default)]
pub struct PacketRouter {
    stats: RouterStats,
}

impl PacketRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// [`route`] plus bookkeeping. Counters never influence the routing.
    pub fn route(&mut self, frame: &[u8]) -> Result<RouterAction, RouterError> {
        self.stats.frames = self.stats.frames.wrapping_add(1);
        let result = route(frame);

        let counter = match &result {
            Ok(RouterAction::Telemetry(_)) => &mut self.stats.telemetry,
            Ok(RouterAction::Command(_)) => &mut self.stats.commands,
            Ok(RouterAction::Ping) => &mut self.stats.pings,
            Ok(RouterAction::AckPong(_)) => &mut self.stats.acks,
            Err(_) => &mut self.stats.dropped,
        };
        *counter = counter.wrapping_add(1);

        result
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }
}

fn switch_frame(tag: PacketType, mhz: f32) -> SwitchFrame {
    let mut frame = SwitchFrame::new();
    frame.push(tag as u8);
    frame.push(CommandCode::SwitchRadioFrequency as u8);
    frame.extend(mhz.to_le_bytes());
    frame
}

/// Ground to remote: switch to `mhz`.
pub fn switch_frequency_command(mhz: f32) -> SwitchFrame {
    switch_frame(PacketType::Command, mhz)
}

/// Remote to ground: echo of the requested frequency.
pub fn switch_frequency_echo(mhz: f32) -> SwitchFrame {
    switch_frame(PacketType::AckPong, mhz)
}

/// Ground to remote: final acknowledgment after a matching echo.
pub fn switch_frequency_ack() -> [u8; 2] {
    [PacketType::AckPong as u8, CommandCode::SwitchRadioFrequency as u8]
}

/// Frequency carried by a well-formed echo, `None` for anything else.
pub fn parse_switch_frequency_echo(frame: &[u8]) -> Option<f32> {
    let frame: &[u8; SWITCH_FRAME_LEN] = frame.try_into().ok()?;
    if frame[0] != PacketType::AckPong as u8 || frame[1] != CommandCode::SwitchRadioFrequency as u8 {
        return None;
    }
    Some(f32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]))
}

/// Frequency requested by a switch command, as the remote parses it.
pub fn parse_switch_frequency_command(frame: &[u8]) -> Option<f32> {
    let frame: &[u8; SWITCH_FRAME_LEN] = frame.try_into().ok()?;
    if frame[0] != PacketType::Command as u8 || frame[1] != CommandCode::SwitchRadioFrequency as u8 {
        return None;
    }
    Some(f32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]))
}
