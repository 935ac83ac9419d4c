//! Typed payloads carried by channel commands
//!
//! All layouts are packed little-endian structs on the wire. Strings live
//! in fixed-width, NUL-padded fields unless noted otherwise.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::command::Command;
use crate::constants::VERSION_FIELD_LEN;
use crate::error::ProtocolError;

const APPKEY_LEN: usize = 48;
const APPSECRET_LEN: usize = 36;

/// Write `value` into a `width` byte field, always leaving a terminating NUL
fn put_fixed_str(buf: &mut BytesMut, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(width.saturating_sub(1));
    buf.put_slice(&bytes[..len]);
    buf.put_bytes(0, width - len);
}

/// Read a NUL-terminated string out of a fixed-width field
fn read_cstr(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn ensure_len(command: Command, payload: &[u8], need: usize) -> Result<(), ProtocolError> {
    if payload.len() < need {
        return Err(ProtocolError::Truncated {
            command: command.name(),
            need,
            got: payload.len(),
        });
    }
    Ok(())
}

/// Credentials sent with the IoT init command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitParam {
    pub appkey: String,
    pub appsecret: String,
}

impl InitParam {
    pub const WIRE_LEN: usize = APPKEY_LEN + APPSECRET_LEN;

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(Command::IotInit, payload, Self::WIRE_LEN)?;
        Ok(Self {
            appkey: read_cstr(&payload[..APPKEY_LEN]),
            appsecret: read_cstr(&payload[APPKEY_LEN..Self::WIRE_LEN]),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        put_fixed_str(&mut buf, &self.appkey, APPKEY_LEN);
        put_fixed_str(&mut buf, &self.appsecret, APPSECRET_LEN);
        buf.freeze()
    }
}

/// Reply to a challenge pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengePackAck {
    pub sequence: u32,
    /// If this is false the HBM stops pushing ADPCM data
    pub net_connected: bool,
    pub version: String,
}

impl ChallengePackAck {
    pub const WIRE_LEN: usize = 8 + VERSION_FIELD_LEN;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u32_le(self.sequence);
        buf.put_u32_le(u32::from(self.net_connected));
        put_fixed_str(&mut buf, &self.version, VERSION_FIELD_LEN);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(Command::ChallengePackAck, payload, Self::WIRE_LEN)?;
        let mut cursor = payload;
        let sequence = cursor.get_u32_le();
        let net_connected = cursor.get_u32_le() != 0;
        Ok(Self {
            sequence,
            net_connected,
            version: read_cstr(&cursor[..VERSION_FIELD_LEN]),
        })
    }
}

/// Remaining space in the HBM playback buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioLenAck {
    pub remain_bytes: u32,
}

impl AudioLenAck {
    pub const WIRE_LEN: usize = 4;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u32_le(self.remain_bytes);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(Command::AudioSourceRemainLenAck, payload, Self::WIRE_LEN)?;
        let mut cursor = payload;
        Ok(Self {
            remain_bytes: cursor.get_u32_le(),
        })
    }
}

/// Recognition result reported back to the HBM
///
/// The hash string is variable length and NUL-terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasrResult {
    pub vui_session_id: u32,
    pub cmd_hash_code: u32,
    pub cmd_hash_string: String,
}

impl RasrResult {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + self.cmd_hash_string.len() + 1);
        buf.put_u32_le(self.vui_session_id);
        buf.put_u32_le(self.cmd_hash_code);
        buf.put_slice(self.cmd_hash_string.as_bytes());
        buf.put_u8(0);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(Command::RasrResult, payload, 8)?;
        let mut cursor = payload;
        let vui_session_id = cursor.get_u32_le();
        let cmd_hash_code = cursor.get_u32_le();
        Ok(Self {
            vui_session_id,
            cmd_hash_code,
            cmd_hash_string: read_cstr(cursor),
        })
    }
}

/// Outcome of network provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetConfigureStatus {
    Success,
    Failure,
}

impl NetConfigureStatus {
    pub const WIRE_LEN: usize = 4;

    pub fn encode(self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u32_le(match self {
            NetConfigureStatus::Success => 0,
            NetConfigureStatus::Failure => 1,
        });
        buf.freeze()
    }
}

/// Inbound packet decoded for the router's internal handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent<'a> {
    Init(InitParam),
    /// Session id is absent when the HBM sends an empty start
    RasrStart { vui_session_id: Option<u32> },
    RasrStop,
    RasrFeed(&'a [u8]),
    RebootRequest,
    ChallengePack,
    AudioLenAck(AudioLenAck),
    /// Known command without an internal handler
    Unhandled(Command),
}

impl<'a> ChannelEvent<'a> {
    pub fn decode(command: Command, payload: &'a [u8]) -> Result<Self, ProtocolError> {
        let event = match command {
            Command::IotInit => ChannelEvent::Init(InitParam::decode(payload)?),
            Command::RasrStart => ChannelEvent::RasrStart {
                vui_session_id: (payload.len() >= 4).then(|| (&payload[..4]).get_u32_le()),
            },
            Command::RasrStop => ChannelEvent::RasrStop,
            Command::RasrDataFeed => ChannelEvent::RasrFeed(payload),
            Command::DaemonRebootRequest => ChannelEvent::RebootRequest,
            Command::ChallengePack => ChannelEvent::ChallengePack,
            Command::AudioSourceRemainLenAck => ChannelEvent::AudioLenAck(AudioLenAck::decode(payload)?),
            other => ChannelEvent::Unhandled(other),
        };
        Ok(event)
    }
}
