//! Bit extraction from 16-bit PLC register words
//!
//! Register values arrive either as native words or as the hex strings the
//! PLC poller writes (`"0100"`, `"0x1F"`, `"a"`). Missing values are expected
//! whenever a poll cycle is dropped, so they read as "all bits off" rather
//! than as an error.

use crate::types::{Result, Timestamp, TrackerError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bits in one PLC register word
pub const BITS_PER_WORD: u8 = 16;

/// A raw register value as captured
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RawValue {
    /// No value captured (polling gap, empty cell)
    #[default]
    Missing,
    /// Already-decoded word
    Word(u16),
    /// Hex text, optionally `0x`-prefixed, up to 4 digits
    Hex(String),
}

impl From<u16> for RawValue {
    fn from(value: u16) -> Self {
        RawValue::Word(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Hex(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Hex(value)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(RawValue::Missing)
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Missing => write!(f, ""),
            RawValue::Word(w) => write!(f, "{:04X}", w),
            RawValue::Hex(s) => write!(f, "{}", s.trim()),
        }
    }
}

/// What to do with a register value that is not valid hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedValuePolicy {
    /// Log a warning and read the word as 0 (all bits off)
    #[default]
    TreatAsZero,
    /// Surface `TrackerError::MalformedValue` to the caller
    Reject,
}

/// Parse a hex register string into a word.
///
/// Empty strings and `nan` are polling gaps and parse as 0. Returns `None`
/// for non-hex characters or more than four digits.
pub fn parse_hex_word(text: &str) -> Option<u16> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return Some(0);
    }

    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    u16::from_str_radix(digits, 16).ok()
}

/// Read one bit of a word (position 0 is the LSB)
pub fn bit_of_word(word: u16, position: u8) -> bool {
    (word >> position) & 1 == 1
}

/// Extracts words and bits from raw register values under a fixed policy.
///
/// The tracker parses each register once per snapshot via [`BitExtractor::word`]
/// and reads all 16 bits from that word, so the malformed-value policy is
/// applied exactly once per register.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitExtractor {
    policy: MalformedValuePolicy,
}

impl BitExtractor {
    pub fn new(policy: MalformedValuePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MalformedValuePolicy {
        self.policy
    }

    /// Decode the raw value `machine` reported for `register` at `timestamp`
    pub fn word(
        &self,
        machine: &str,
        timestamp: Timestamp,
        register: u32,
        value: &RawValue,
    ) -> Result<u16> {
        let parsed = match value {
            RawValue::Missing => Some(0),
            RawValue::Word(w) => Some(*w),
            RawValue::Hex(text) => parse_hex_word(text),
        };

        match (parsed, self.policy) {
            (Some(word), _) => Ok(word),
            (None, MalformedValuePolicy::TreatAsZero) => {
                log::warn!(
                    "{} register {} at {} has malformed value {:?}, reading as 0",
                    machine,
                    register,
                    timestamp,
                    value.to_string()
                );
                Ok(0)
            }
            (None, MalformedValuePolicy::Reject) => Err(TrackerError::MalformedValue {
                machine: machine.to_string(),
                timestamp,
                register,
                value: value.to_string(),
            }),
        }
    }

    /// Extract a single bit from a raw value
    pub fn bit(
        &self,
        machine: &str,
        timestamp: Timestamp,
        register: u32,
        value: &RawValue,
        position: u8,
    ) -> Result<bool> {
        if position >= BITS_PER_WORD {
            return Err(TrackerError::InvalidBitPosition(position));
        }
        let word = self.word(machine, timestamp, register, value)?;
        Ok(bit_of_word(word, position))
    }
}
