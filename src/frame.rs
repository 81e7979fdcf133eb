//! LoRaWAN data frame parsing
//!
//! Layout of an uplink PHYPayload as seen by this gateway:
//!
//! ```text
//! | MHDR | DevAddr (LE) | FCtrl | FCnt (LE) | FPort | FRMPayload ... | MIC |
//! |  1   |      4       |   1   |     2     |   1   |    variable    |  4  |
//! ```
//!
//! FCtrl and MHDR are carried but not interpreted. The MIC is parsed and never verified.

use crate::error::FrameError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Header bytes preceding FRMPayload
pub const HEADER_LEN: usize = 9;
/// Trailing message integrity code
pub const MIC_LEN: usize = 4;
/// LoRa PHY length field is one byte
pub const MAX_PHY_PAYLOAD_LEN: usize = 255;

/// Device address in canonical big-endian order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevAddr(pub u32);

impl DevAddr {
    /// Build from the four bytes as transmitted (least-significant byte first)
    pub fn from_wire(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    /// Bytes in over-the-air order
    pub fn to_wire(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl FromStr for DevAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 8 {
            return Err(format!("DevAddr must be 8 hex characters, got '{}'", s));
        }
        u32::from_str_radix(s, 16)
            .map(DevAddr)
            .map_err(|e| format!("invalid DevAddr '{}': {}", s, e))
    }
}

impl Serialize for DevAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DevAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parsed uplink data frame
#[derive(Debug, Clone, PartialEq)]
pub struct LoRaWanFrame {
    pub mhdr: u8,
    pub dev_addr: DevAddr,
    pub fctrl: u8,
    pub fcnt: u16,
    pub fport: u8,
    pub frm_payload: Vec<u8>,
    pub mic: [u8; 4],
}

impl LoRaWanFrame {
    /// Split a raw PHYPayload into its fields
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        let min = HEADER_LEN + MIC_LEN;
        if raw.len() < min {
            return Err(FrameError::TooShort {
                expected: min,
                actual: raw.len(),
            });
        }
        if raw.len() > MAX_PHY_PAYLOAD_LEN {
            return Err(FrameError::TooLong {
                max: MAX_PHY_PAYLOAD_LEN,
                actual: raw.len(),
            });
        }

        let mic_start = raw.len() - MIC_LEN;
        let mut mic = [0u8; 4];
        mic.copy_from_slice(&raw[mic_start..]);

        Ok(Self {
            mhdr: raw[0],
            dev_addr: DevAddr::from_wire([raw[1], raw[2], raw[3], raw[4]]),
            fctrl: raw[5],
            fcnt: u16::from_le_bytes([raw[6], raw[7]]),
            fport: raw[8],
            frm_payload: raw[HEADER_LEN..mic_start].to_vec(),
            mic,
        })
    }

    /// Deduplication key: `DEVADDR-fcnt-ciphertexthex`
    ///
    /// The MIC is left out so the same uplink relayed twice collapses to one key.
    pub fn signature(&self) -> String {
        format!(
            "{}-{}-{}",
            self.dev_addr,
            self.fcnt,
            hex::encode(&self.frm_payload)
        )
    }

    /// Serialize back to PHYPayload bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.frm_payload.len() + MIC_LEN);
        out.push(self.mhdr);
        out.extend_from_slice(&self.dev_addr.to_wire());
        out.push(self.fctrl);
        out.extend_from_slice(&self.fcnt.to_le_bytes());
        out.push(self.fport);
        out.extend_from_slice(&self.frm_payload);
        out.extend_from_slice(&self.mic);
        out
    }
}
