//! Core types for the PLC error tracker
//!
//! This module defines the values that flow through the engine: register
//! observations coming in, per-machine snapshots built from them, and the
//! start/end event records going out.

use crate::bits::RawValue;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp type used throughout the tracker (PLC clocks carry no timezone)
pub type Timestamp = NaiveDateTime;

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Errors that can occur while configuring or running the tracker
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Unknown pattern: {0}")]
    UnknownPattern(String),

    #[error("Out of range for pattern '{pattern}': {reason}")]
    OutOfRange { pattern: String, reason: String },

    #[error("Malformed register value {value:?} (machine {machine}, register {register}, at {timestamp})")]
    MalformedValue {
        machine: String,
        timestamp: Timestamp,
        register: u32,
        value: String,
    },

    #[error("Bit position {0} is not in 0..=15")]
    InvalidBitPosition(u8),

    #[error("Snapshot for machine {machine} at {current} is older than {previous}")]
    OutOfOrder {
        machine: String,
        previous: Timestamp,
        current: Timestamp,
    },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid register address: {0}")]
    InvalidAddress(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Failed to serialize record: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A single register reading as delivered by the collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// When the PLC word was sampled
    pub timestamp: Timestamp,
    /// Machine the register belongs to (e.g. "AM322")
    pub machine: String,
    /// IO register number (e.g. 550)
    pub register: u32,
    /// Raw word as captured
    pub value: RawValue,
}

impl Observation {
    /// Create a new observation
    pub fn new(
        timestamp: Timestamp,
        machine: impl Into<String>,
        register: u32,
        value: impl Into<RawValue>,
    ) -> Self {
        Self {
            timestamp,
            machine: machine.into(),
            register,
            value: value.into(),
        }
    }
}

/// All registers captured for one machine at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp: Timestamp,
    pub machine: String,
    /// Register number -> raw value, iterated in ascending register order
    pub registers: BTreeMap<u32, RawValue>,
}

impl Snapshot {
    /// Create an empty snapshot
    pub fn new(timestamp: Timestamp, machine: impl Into<String>) -> Self {
        Self {
            timestamp,
            machine: machine.into(),
            registers: BTreeMap::new(),
        }
    }

    /// Builder method: add a register value
    pub fn with_register(mut self, register: u32, value: impl Into<RawValue>) -> Self {
        self.registers.insert(register, value.into());
        self
    }

    /// Insert (or overwrite) a register value
    pub fn insert(&mut self, register: u32, value: RawValue) {
        self.registers.insert(register, value);
    }
}

/// Group observations into chronologically ordered per-machine snapshots.
///
/// Input order does not matter: observations are stably sorted by timestamp
/// before grouping, so a later duplicate of the same register at the same
/// instant overwrites an earlier one.
pub fn group_observations<I>(observations: I) -> Vec<Snapshot>
where
    I: IntoIterator<Item = Observation>,
{
    let mut observations: Vec<Observation> = observations.into_iter().collect();
    observations.sort_by_key(|o| o.timestamp);

    let mut grouped: BTreeMap<(Timestamp, String), Snapshot> = BTreeMap::new();
    for obs in observations {
        grouped
            .entry((obs.timestamp, obs.machine.clone()))
            .or_insert_with(|| Snapshot::new(obs.timestamp, obs.machine))
            .insert(obs.register, obs.value);
    }

    grouped.into_values().collect()
}

/// Whether an event marks the start or the end of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Started,
    Ended,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStatus::Started => f.pad("started"),
            EventStatus::Ended => f.pad("ended"),
        }
    }
}

/// An emitted error transition
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Timestamp of the snapshot that caused the transition
    pub timestamp: Timestamp,
    /// Machine name
    pub machine: String,
    /// Static display code of the machine
    pub machine_code: u32,
    /// Logical error number within the machine's pattern
    pub bit_number: u32,
    /// Category name captured when the error started
    pub category: String,
    /// Short code of that category
    pub category_code: String,
    pub status: EventStatus,
    /// Zero for `Started`, elapsed on-time for `Ended`
    pub duration: Duration,
}

impl EventRecord {
    /// Duration in seconds, rounded to milliseconds
    pub fn duration_secs(&self) -> f64 {
        match self.duration.num_microseconds() {
            Some(micros) => (micros as f64 / 1000.0).round() / 1000.0,
            None => self.duration.num_milliseconds() as f64 / 1000.0,
        }
    }

    pub fn is_start(&self) -> bool {
        self.status == EventStatus::Started
    }
}
