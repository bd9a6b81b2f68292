//! Activation code parsing, validation and generation.
//!
//! An activation code is 12 bytes (10 random bytes followed by their
//! CRC-16/XMODEM checksum, big-endian) rendered as 20 Base32 characters in
//! four dash-separated groups of five, `XXXXX-XXXXX-XXXXX-XXXXX`. The
//! checksum lets the client reject typos locally before any network call.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CryptoError, CryptoResult};

/// Raw size of a decoded activation code.
pub const CODE_BYTES: usize = 12;

/// Number of dash-separated character groups.
const CODE_GROUPS: usize = 4;

/// Characters per group.
const GROUP_LEN: usize = 5;

/// RFC 4648 Base32 alphabet, no padding characters.
const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// A syntactically valid activation code.
///
/// Construction always validates the checksum, so holding a value of this
/// type means the code survived local validation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActivationCode {
    bytes: [u8; CODE_BYTES],
}

impl ActivationCode {
    /// Parses a code in canonical `XXXXX-XXXXX-XXXXX-XXXXX` form.
    ///
    /// Rejects wrong grouping, characters outside the Base32 alphabet,
    /// and codes whose checksum does not match.
    pub fn parse(input: &str) -> CryptoResult<Self> {
        let groups: Vec<&str> = input.split('-').collect();
        if groups.len() != CODE_GROUPS || groups.iter().any(|g| g.len() != GROUP_LEN) {
            return Err(CryptoError::InvalidActivationCode(format!(
                "expected {CODE_GROUPS} groups of {GROUP_LEN} characters"
            )));
        }

        let compact: String = groups.concat();
        let bytes = base32_decode(&compact)?;

        let expected = crc16(&bytes[..CODE_BYTES - 2]);
        let actual = u16::from_be_bytes([bytes[CODE_BYTES - 2], bytes[CODE_BYTES - 1]]);
        if expected != actual {
            return Err(CryptoError::InvalidActivationCode(
                "checksum mismatch".to_string(),
            ));
        }

        Ok(Self { bytes })
    }

    /// Generates a fresh random code with a valid checksum.
    #[must_use]
    pub fn generate() -> Self {
        use rand::RngCore;

        let mut bytes = [0u8; CODE_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes[..CODE_BYTES - 2]);
        let crc = crc16(&bytes[..CODE_BYTES - 2]);
        bytes[CODE_BYTES - 2..].copy_from_slice(&crc.to_be_bytes());
        Self { bytes }
    }

    /// Renders the canonical dash-grouped form.
    #[must_use]
    pub fn canonical(&self) -> String {
        let flat = base32_encode(&self.bytes);
        let mut out = String::with_capacity(flat.len() + CODE_GROUPS - 1);
        for (i, ch) in flat.chars().enumerate() {
            if i > 0 && i % GROUP_LEN == 0 {
                out.push('-');
            }
            out.push(ch);
        }
        out
    }
}

impl fmt::Display for ActivationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl fmt::Debug for ActivationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActivationCode({})", self.canonical())
    }
}

impl FromStr for ActivationCode {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ActivationCode {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ActivationCode> for String {
    fn from(code: ActivationCode) -> Self {
        code.canonical()
    }
}

/// CRC-16/XMODEM (poly 0x1021, init 0x0000).
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0x0000;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Encodes 12 bytes as 20 Base32 characters (96 bits -> 19 full symbols
/// plus one symbol carrying the final bit and four zero pad bits).
fn base32_encode(data: &[u8; CODE_BYTES]) -> String {
    let mut out = String::with_capacity(CODE_GROUPS * GROUP_LEN);
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

/// Decodes 20 Base32 characters into 12 bytes, rejecting foreign symbols
/// and nonzero pad bits.
fn base32_decode(input: &str) -> CryptoResult<[u8; CODE_BYTES]> {
    let mut out = [0u8; CODE_BYTES];
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;
    let mut written = 0;

    for ch in input.bytes() {
        let value = ALPHABET
            .iter()
            .position(|&a| a == ch)
            .ok_or_else(|| {
                CryptoError::InvalidActivationCode(format!(
                    "character {:?} outside the code alphabet",
                    ch as char
                ))
            })? as u32;

        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            if written == CODE_BYTES {
                return Err(CryptoError::InvalidActivationCode(
                    "code too long".to_string(),
                ));
            }
            out[written] = ((buffer >> bits) & 0xff) as u8;
            written += 1;
        }
    }

    if written != CODE_BYTES {
        return Err(CryptoError::InvalidActivationCode(
            "code too short".to_string(),
        ));
    }
    // The final symbol contributes 1 data bit; its trailing pad bits
    // must be zero or the code was not produced by this encoding.
    if bits > 0 && (buffer & ((1 << bits) - 1)) != 0 {
        return Err(CryptoError::InvalidActivationCode(
            "nonzero padding bits".to_string(),
        ));
    }

    Ok(out)
}
