//! FRMPayload encryption for LoRaWAN 1.0 ABP
//!
//! The payload is XORed with a keystream built from AES-128 encryptions of counter
//! blocks `A_i`:
//!
//! ```text
//! | 0x01 | 0x00 x4 | Dir | DevAddr (LE) | FCnt (LE, 32-bit) | 0x00 | i |
//! ```
//!
//! One block is generated per 16 bytes of payload, so frames of any length round-trip.
//! Encryption and decryption are the same operation.

use crate::frame::DevAddr;
use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use std::fmt;
use std::str::FromStr;

const BLOCK_LEN: usize = 16;

/// Link direction, byte 5 of each counter block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    Uplink = 0,
    Downlink = 1,
}

/// 128-bit application session key
#[derive(Clone, PartialEq, Eq)]
pub struct AppSKey([u8; 16]);

impl AppSKey {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

// Keys never end up in logs
impl fmt::Debug for AppSKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AppSKey(<redacted>)")
    }
}

impl FromStr for AppSKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| format!("invalid AppSKey hex: {}", e))?;
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| format!("AppSKey must be 16 bytes, got {}", v.len()))?;
        Ok(Self(bytes))
    }
}

/// Counter block `A_i` for keystream block `index`
fn counter_block(direction: Direction, dev_addr: DevAddr, fcnt: u32, index: u8) -> [u8; 16] {
    let mut block = [0u8; BLOCK_LEN];
    block[0] = 0x01;
    block[5] = direction as u8;
    block[6..10].copy_from_slice(&dev_addr.to_wire());
    block[10..14].copy_from_slice(&fcnt.to_le_bytes());
    block[15] = index;
    block
}

/// Keystream of exactly `len` bytes
pub fn keystream(
    key: &AppSKey,
    dev_addr: DevAddr,
    fcnt: u32,
    direction: Direction,
    len: usize,
) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    let mut stream = Vec::with_capacity(len.div_ceil(BLOCK_LEN) * BLOCK_LEN);

    // Frames are capped at 255 bytes by LoRaWanFrame::parse, so the index never wraps
    for index in 1..=len.div_ceil(BLOCK_LEN) {
        let mut block =
            GenericArray::from(counter_block(direction, dev_addr, fcnt, index as u8));
        cipher.encrypt_block(&mut block);
        stream.extend_from_slice(&block);
    }

    stream.truncate(len);
    stream
}

/// Decrypt (or encrypt) a FRMPayload
pub fn decrypt_frm_payload(
    key: &AppSKey,
    dev_addr: DevAddr,
    fcnt: u32,
    direction: Direction,
    payload: &[u8],
) -> Vec<u8> {
    keystream(key, dev_addr, fcnt, direction, payload.len())
        .iter()
        .zip(payload)
        .map(|(k, p)| k ^ p)
        .collect()
}

/// Alias of [`decrypt_frm_payload`]; the XOR keystream is its own inverse
pub fn encrypt_frm_payload(
    key: &AppSKey,
    dev_addr: DevAddr,
    fcnt: u32,
    direction: Direction,
    payload: &[u8],
) -> Vec<u8> {
    decrypt_frm_payload(key, dev_addr, fcnt, direction, payload)
}
