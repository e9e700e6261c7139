//! Output record assembly
//!
//! Turns tracker events into the flat rows loaded into the error table. Each
//! row is enriched with values read from other PLC fields (operating mode,
//! worker id, per-station work/serial numbers) as of the event's timestamp.

use crate::bits::{parse_hex_word, RawValue};
use crate::config::EmitterConfig;
use crate::types::{EventRecord, EventStatus, Result, Timestamp};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;

/// How a context value is matched to an event timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupPolicy {
    /// Only a value captured at exactly the event timestamp
    Exact,
    /// The most recent value captured at or before the event timestamp
    #[default]
    AtOrBefore,
}

/// Read-only source of per-machine field values over time
pub trait ContextSource {
    fn value_at(
        &self,
        timestamp: Timestamp,
        machine: &str,
        field: &str,
        policy: LookupPolicy,
    ) -> Option<&str>;
}

/// Time series of field values per machine
#[derive(Debug, Clone, Default)]
pub struct ValueHistory {
    series: HashMap<String, HashMap<String, BTreeMap<Timestamp, String>>>,
}

impl ValueHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a field value; a later value at the same instant replaces it
    pub fn record(
        &mut self,
        timestamp: Timestamp,
        machine: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.series
            .entry(machine.into())
            .or_default()
            .entry(field.into())
            .or_default()
            .insert(timestamp, value.into());
    }

    /// Build a history of IO register fields (`IO_0550`) from observations
    pub fn from_observations<'o, I>(observations: I) -> Self
    where
        I: IntoIterator<Item = &'o crate::types::Observation>,
    {
        let mut history = Self::new();
        history.extend_observations(observations);
        history
    }

    pub fn extend_observations<'o, I>(&mut self, observations: I)
    where
        I: IntoIterator<Item = &'o crate::types::Observation>,
    {
        for obs in observations {
            if obs.value == RawValue::Missing {
                continue;
            }
            self.record(
                obs.timestamp,
                obs.machine.as_str(),
                io_field(obs.register),
                obs.value.to_string(),
            );
        }
    }

    /// Number of recorded values
    pub fn len(&self) -> usize {
        self.series
            .values()
            .flat_map(HashMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContextSource for ValueHistory {
    fn value_at(
        &self,
        timestamp: Timestamp,
        machine: &str,
        field: &str,
        policy: LookupPolicy,
    ) -> Option<&str> {
        let series = self.series.get(machine)?.get(field)?;
        let value = match policy {
            LookupPolicy::Exact => series.get(&timestamp),
            LookupPolicy::AtOrBefore => series.range(..=timestamp).next_back().map(|(_, v)| v),
        };
        value.map(String::as_str)
    }
}

/// Field name of an IO-area register
pub fn io_field(register: u32) -> String {
    format!("IO_{:04}", register)
}

/// Machine operating mode, decoded from the mode register word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Automatic,
    Manual,
    /// Workpiece discharge
    Discharge,
}

impl OperatingMode {
    pub fn from_word(word: u16) -> Option<Self> {
        match word {
            0x9000 => Some(OperatingMode::Automatic),
            0xA000 => Some(OperatingMode::Manual),
            0x8000 => Some(OperatingMode::Discharge),
            _ => None,
        }
    }

    /// Decode a hex register value (e.g. "9000")
    pub fn from_register_value(value: &str) -> Option<Self> {
        if value.trim().is_empty() {
            return None;
        }
        parse_hex_word(value).and_then(Self::from_word)
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Automatic => f.pad("automatic"),
            OperatingMode::Manual => f.pad("manual"),
            OperatingMode::Discharge => f.pad("discharge"),
        }
    }
}

/// A supplementary column value; `None` when the field was not found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnValue {
    pub column: String,
    pub value: Option<String>,
}

/// One row of the error table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: Timestamp,
    pub work_date: NaiveDate,
    pub shift: String,
    pub unit_code: String,
    pub machine_code: u32,
    pub machine: String,
    pub worker: Option<String>,
    pub operating_mode: Option<OperatingMode>,
    pub category: String,
    pub category_code: String,
    pub bit_number: u32,
    pub status: EventStatus,
    /// Seconds, millisecond precision
    pub duration_secs: f64,
    pub supplementary: Vec<ColumnValue>,
}

/// Builds records from events; never mutates the context it reads
#[derive(Debug, Clone)]
pub struct EventEmitter<'a> {
    config: &'a EmitterConfig,
}

impl<'a> EventEmitter<'a> {
    pub fn new(config: &'a EmitterConfig) -> Self {
        Self { config }
    }

    pub fn emit<C: ContextSource + ?Sized>(&self, event: &EventRecord, context: &C) -> Record {
        let lookup = |field: &str, policy: LookupPolicy| {
            context
                .value_at(event.timestamp, &event.machine, field, policy)
                .map(str::to_string)
        };

        let operating_mode = context
            .value_at(
                event.timestamp,
                &event.machine,
                &self.config.mode_field,
                self.config.mode_lookup,
            )
            .and_then(OperatingMode::from_register_value);

        let worker = self
            .config
            .worker_field
            .as_deref()
            .and_then(|field| lookup(field, LookupPolicy::AtOrBefore));

        let supplementary = self
            .config
            .supplementary
            .iter()
            .map(|column| ColumnValue {
                column: column.name.clone(),
                value: lookup(&column.field, column.lookup),
            })
            .collect();

        Record {
            timestamp: event.timestamp,
            work_date: event.timestamp.date(),
            shift: self.config.shift.clone(),
            unit_code: self.config.unit_code.clone(),
            machine_code: event.machine_code,
            machine: event.machine.clone(),
            worker,
            operating_mode,
            category: event.category.clone(),
            category_code: event.category_code.clone(),
            bit_number: event.bit_number,
            status: event.status,
            duration_secs: event.duration_secs(),
            supplementary,
        }
    }
}

/// Append-only table of emitted records
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    rows: Vec<Record>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record) {
        self.rows.push(record);
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<Record> {
        self.rows
    }

    /// Write one JSON object per row
    pub fn write_json_lines<W: Write>(&self, mut writer: W) -> Result<()> {
        for row in &self.rows {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl Extend<Record> for EventTable {
    fn extend<T: IntoIterator<Item = Record>>(&mut self, iter: T) {
        self.rows.extend(iter);
    }
}
