//! Helpers for long-format PLC rows
//!
//! The data collector exports one row per register reading:
//! `Timestamp, Machine_Name, reg_address, value`. Wide exports name their
//! columns `P6_IO_0500_C` and pack cells as `value&&HH:MM:SS:mmm`. These
//! helpers turn either shape into [`Observation`]s for IO registers and
//! context values for data-memory fields.

use crate::emitter::ValueHistory;
use crate::types::{Observation, Result, Timestamp, TrackerError};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;

/// PLC memory area of a register address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryArea {
    /// IO area, carries the error bits
    Io,
    /// Data memory, carries worker ids, work and serial numbers
    Dm,
}

/// Register address split into area and number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterField {
    pub area: MemoryArea,
    pub number: u32,
}

impl fmt::Display for RegisterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.area {
            MemoryArea::Io => write!(f, "IO_{:04}", self.number),
            MemoryArea::Dm => write!(f, "D_{}", self.number),
        }
    }
}

/// Parse a register address such as `IO_0550`, `D_31651` or `DM31651`
pub fn parse_register_field(text: &str) -> Result<RegisterField> {
    let trimmed = text.trim();
    let upper = trimmed.to_ascii_uppercase();

    let (area, digits) = if let Some(rest) = upper.strip_prefix("IO") {
        (MemoryArea::Io, rest)
    } else if let Some(rest) = upper.strip_prefix("DM") {
        (MemoryArea::Dm, rest)
    } else if let Some(rest) = upper.strip_prefix('D') {
        (MemoryArea::Dm, rest)
    } else {
        return Err(TrackerError::InvalidAddress(trimmed.to_string()));
    };

    let digits = digits.trim_start_matches('_');
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(TrackerError::InvalidAddress(trimmed.to_string()));
    }

    let number = digits
        .parse::<u32>()
        .map_err(|_| TrackerError::InvalidAddress(trimmed.to_string()))?;
    Ok(RegisterField { area, number })
}

/// Split a packed `value&&time` cell; cells without a separator are all value
pub fn split_value_cell(cell: &str) -> (&str, Option<&str>) {
    match cell.split_once("&&") {
        Some((value, time)) => (value.trim(), Some(time.trim())),
        None => (cell.trim(), None),
    }
}

/// Strip the station prefix and suffix from a wide column name.
///
/// `P6_IO_0500_C` becomes `IO_0500`. Names with fewer than three parts are
/// returned unchanged.
pub fn strip_column_decoration(column: &str) -> &str {
    let parts: Vec<&str> = column.split('_').collect();
    if parts.len() < 3 {
        return column;
    }

    let start = parts[0].len() + 1;
    let end = column.len() - parts[parts.len() - 1].len() - 1;
    &column[start..end]
}

const FULL_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Parse a PLC timestamp.
///
/// Accepts full date-time stamps, or a time of day (`HH:MM:SS:mmm`,
/// `HH:MM:SS.fff`, `HH:MM:SS`) combined with `work_date`. The fourth field
/// of the colon form is a fraction of a second, so `:25` is 250 ms.
pub fn parse_plc_timestamp(text: &str, work_date: Option<NaiveDate>) -> Result<Timestamp> {
    let trimmed = text.trim();

    for format in FULL_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(ts);
        }
    }

    let time = parse_time_of_day(trimmed)
        .ok_or_else(|| TrackerError::InvalidTimestamp(trimmed.to_string()))?;
    let date = work_date.ok_or_else(|| {
        TrackerError::InvalidTimestamp(format!("{} (time of day without a work date)", trimmed))
    })?;
    Ok(date.and_time(time))
}

fn parse_time_of_day(text: &str) -> Option<NaiveTime> {
    let normalized = match text.rsplit_once(':') {
        Some((head, fraction)) if head.matches(':').count() == 2 => {
            format!("{}.{}", head, fraction)
        }
        _ => text.to_string(),
    };
    NaiveTime::parse_from_str(&normalized, "%H:%M:%S%.f").ok()
}

/// Build an observation from one long-format row.
///
/// A packed `value&&time` cell takes its time from the cell, on the date of
/// `timestamp`. Data-memory rows return `None`; use [`record_context_row`]
/// for those.
pub fn observation_from_row(
    timestamp: Timestamp,
    machine: &str,
    reg_address: &str,
    cell: &str,
) -> Result<Option<Observation>> {
    let field = parse_register_field(strip_column_decoration(reg_address))?;
    if field.area != MemoryArea::Io {
        return Ok(None);
    }

    let (value, at) = resolve_cell(timestamp, cell)?;
    let value = (!value.is_empty()).then_some(value);
    Ok(Some(Observation::new(at, machine, field.number, value)))
}

/// Record a row of any area into a context history under its field name
pub fn record_context_row(
    history: &mut ValueHistory,
    timestamp: Timestamp,
    machine: &str,
    reg_address: &str,
    cell: &str,
) -> Result<()> {
    let field = parse_register_field(strip_column_decoration(reg_address))?;
    let (value, at) = resolve_cell(timestamp, cell)?;
    if value.is_empty() {
        return Ok(());
    }
    history.record(at, machine, field.to_string(), value);
    Ok(())
}

fn resolve_cell(timestamp: Timestamp, cell: &str) -> Result<(&str, Timestamp)> {
    let (value, time) = split_value_cell(cell);
    let at = match time {
        Some(time) => parse_plc_timestamp(time, Some(timestamp.date()))?,
        None => timestamp,
    };
    Ok((value, at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::RawValue;
    use crate::emitter::{ContextSource, LookupPolicy};

    fn work_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 27).unwrap()
    }

    fn at(h: u32, m: u32, s: u32, ms: u32) -> Timestamp {
        work_date().and_hms_milli_opt(h, m, s, ms).unwrap()
    }

    #[test]
    fn test_parse_register_field() {
        assert_eq!(
            parse_register_field("IO_0550").unwrap(),
            RegisterField { area: MemoryArea::Io, number: 550 }
        );
        assert_eq!(
            parse_register_field("D_31651").unwrap(),
            RegisterField { area: MemoryArea::Dm, number: 31651 }
        );
        assert_eq!(parse_register_field("DM31651").unwrap().area, MemoryArea::Dm);
        assert_eq!(parse_register_field("io_0502").unwrap().number, 502);

        assert!(matches!(parse_register_field("W_100"), Err(TrackerError::InvalidAddress(_))));
        assert!(matches!(parse_register_field("IO_"), Err(TrackerError::InvalidAddress(_))));
        assert!(matches!(parse_register_field("IO_05x0"), Err(TrackerError::InvalidAddress(_))));
    }

    #[test]
    fn test_register_field_display() {
        assert_eq!(parse_register_field("IO_550").unwrap().to_string(), "IO_0550");
        assert_eq!(parse_register_field("DM31651").unwrap().to_string(), "D_31651");
    }

    #[test]
    fn test_split_value_cell() {
        assert_eq!(split_value_cell("0100&&14:00:01:250"), ("0100", Some("14:00:01:250")));
        assert_eq!(split_value_cell("0100"), ("0100", None));
        assert_eq!(split_value_cell("&&14:00:01"), ("", Some("14:00:01")));
    }

    #[test]
    fn test_strip_column_decoration() {
        assert_eq!(strip_column_decoration("P6_IO_0500_C"), "IO_0500");
        assert_eq!(strip_column_decoration("P6_D_31651_C"), "D_31651");
        assert_eq!(strip_column_decoration("IO_0500"), "IO_0500");
    }

    #[test]
    fn test_parse_plc_timestamp_forms() {
        let date = Some(work_date());
        assert_eq!(parse_plc_timestamp("14:00:01:250", date).unwrap(), at(14, 0, 1, 250));
        assert_eq!(parse_plc_timestamp("14:00:01.5", date).unwrap(), at(14, 0, 1, 500));
        assert_eq!(parse_plc_timestamp("14:00:01", date).unwrap(), at(14, 0, 1, 0));
        assert_eq!(
            parse_plc_timestamp("2025-11-27 14:00:01.250", None).unwrap(),
            at(14, 0, 1, 250)
        );
        assert_eq!(parse_plc_timestamp("2025/11/27 14:00:01", None).unwrap(), at(14, 0, 1, 0));
    }

    #[test]
    fn test_parse_plc_timestamp_errors() {
        assert!(matches!(
            parse_plc_timestamp("14:00:01", None),
            Err(TrackerError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            parse_plc_timestamp("yesterday", Some(work_date())),
            Err(TrackerError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_observation_from_row() {
        let obs = observation_from_row(at(14, 0, 0, 0), "AM322", "P6_IO_0550_C", "0100&&14:00:01:250")
            .unwrap()
            .unwrap();
        assert_eq!(obs.register, 550);
        assert_eq!(obs.timestamp, at(14, 0, 1, 250));
        assert_eq!(obs.value, RawValue::from("0100"));

        let gap = observation_from_row(at(14, 0, 0, 0), "AM322", "IO_0551", "")
            .unwrap()
            .unwrap();
        assert_eq!(gap.value, RawValue::Missing);

        assert!(observation_from_row(at(14, 0, 0, 0), "AM322", "D_31651", "0007")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_record_context_row() {
        let mut history = ValueHistory::new();
        record_context_row(&mut history, at(14, 0, 0, 0), "AM322", "DM31651", "0007").unwrap();
        record_context_row(&mut history, at(14, 0, 0, 0), "AM322", "IO_0502", "9000&&14:00:02:000").unwrap();
        record_context_row(&mut history, at(14, 0, 5, 0), "AM322", "D_31651", "").unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(
            history.value_at(at(14, 0, 9, 0), "AM322", "D_31651", LookupPolicy::AtOrBefore),
            Some("0007")
        );
        assert_eq!(
            history.value_at(at(14, 0, 2, 0), "AM322", "IO_0502", LookupPolicy::Exact),
            Some("9000")
        );
    }
}
