//! Semtech UDP packet forwarder protocol (gateway side)
//!
//! Every datagram starts with a 4-byte header:
//!
//! ```text
//! | version | token (2 bytes, opaque) | packet type |
//! ```
//!
//! PUSH_DATA carries a JSON object after the header (and after the gateway EUI on
//! newer forwarders). There is no length prefix, so the body is located by its
//! outermost braces.

use crate::error::ProtocolError;
use base64::Engine;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const HEADER_LEN: usize = 4;
pub const GATEWAY_EUI_LEN: usize = 8;

/// Default forwarder port
pub const DEFAULT_PORT: u16 = 1700;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    PushData = 0x00,
    PushAck = 0x01,
    PullData = 0x02,
    PullAck = 0x04,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::PushData),
            0x01 => Some(Self::PushAck),
            0x02 => Some(Self::PullData),
            0x04 => Some(Self::PullAck),
            _ => None,
        }
    }
}

/// Borrowed view of one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub version: u8,
    /// Echoed verbatim in acks, never interpreted
    pub token: [u8; 2],
    pub packet_type: u8,
    /// Everything after the header
    pub body: &'a [u8],
}

impl<'a> Envelope<'a> {
    pub fn parse(datagram: &'a [u8]) -> Result<Self, ProtocolError> {
        if datagram.len() < HEADER_LEN {
            return Err(ProtocolError::TooShort(datagram.len()));
        }
        Ok(Self {
            version: datagram[0],
            token: [datagram[1], datagram[2]],
            packet_type: datagram[3],
            body: &datagram[HEADER_LEN..],
        })
    }

    pub fn kind(&self) -> Option<PacketType> {
        PacketType::from_u8(self.packet_type)
    }

    /// JSON-bearing part of the body, past the gateway EUI when one is present
    pub fn json_body(&self) -> &'a [u8] {
        match self.body.get(GATEWAY_EUI_LEN) {
            Some(b'{') => &self.body[GATEWAY_EUI_LEN..],
            _ => self.body,
        }
    }

    /// Acknowledgement owed for this envelope, if any
    pub fn ack(&self) -> Option<BytesMut> {
        match self.kind()? {
            PacketType::PushData => Some(ack(self.version, self.token, PacketType::PushAck)),
            PacketType::PullData => Some(ack(self.version, self.token, PacketType::PullAck)),
            PacketType::PushAck | PacketType::PullAck => None,
        }
    }
}

/// `[version][token][ack type]`
pub fn ack(version: u8, token: [u8; 2], ack_type: PacketType) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    buf.put_u8(version);
    buf.put_slice(&token);
    buf.put_u8(ack_type as u8);
    buf
}

/// Build a PUSH_DATA datagram (used by the simulator and tests)
pub fn push_data(version: u8, token: [u8; 2], gateway_eui: &[u8; 8], json: &str) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + GATEWAY_EUI_LEN + json.len());
    buf.put_u8(version);
    buf.put_slice(&token);
    buf.put_u8(PacketType::PushData as u8);
    buf.put_slice(gateway_eui);
    buf.put_slice(json.as_bytes());
    buf.to_vec()
}

/// JSON body of a PUSH_DATA datagram
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushDataBody {
    /// Entries are kept raw so one malformed entry does not sink its siblings
    #[serde(default)]
    pub rxpk: Vec<Value>,
    #[serde(default)]
    pub stat: Option<Value>,
}

/// One received packet; radio metadata is passed through untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rxpk {
    /// Base64 PHYPayload
    pub data: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Rxpk {
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn new(phy_payload: &[u8]) -> Self {
        Self {
            data: base64::engine::general_purpose::STANDARD.encode(phy_payload),
            metadata: Map::new(),
        }
    }

    /// Decoded PHYPayload bytes
    pub fn payload(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(base64::engine::general_purpose::STANDARD.decode(self.data.trim())?)
    }
}

/// Parse the byte range from the first `{` to the last `}` as the PUSH_DATA body
pub fn extract_json_segment(data: &[u8]) -> Result<PushDataBody, ProtocolError> {
    let start = data.iter().position(|&b| b == b'{');
    let end = data.iter().rposition(|&b| b == b'}');

    match (start, end) {
        (Some(start), Some(end)) if end > start => {
            Ok(serde_json::from_slice(&data[start..=end])?)
        }
        _ => Err(ProtocolError::NoJson),
    }
}
