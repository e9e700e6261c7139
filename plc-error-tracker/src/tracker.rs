//! Error transition tracking
//!
//! Each monitored bit of each machine is a two-state machine:
//!
//! ```text
//! INACTIVE --(bit 0->1)--> ACTIVE     emit Started, duration 0
//! ACTIVE   --(bit 1->0)--> INACTIVE   emit Ended, duration = now - start
//! ```
//!
//! Only active bits are stored, in one flat table keyed by
//! (machine, bit number). A bit that reads 0 with no entry (it was already
//! on before tracking began and is now clearing) produces nothing.

use crate::address_map::{AddressMap, Pattern};
use crate::bits::{bit_of_word, BitExtractor, BITS_PER_WORD};
use crate::config::{MachineConfig, PlantConfig};
use crate::types::{EventRecord, EventStatus, Result, Snapshot, Timestamp, TrackerError};
use chrono::Duration;
use std::collections::{BTreeMap, HashMap};

/// Interned machine handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MachineId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ActiveKey {
    machine: MachineId,
    bit_number: u32,
}

#[derive(Debug, Clone)]
struct ActiveEntry {
    start_time: Timestamp,
    category: String,
    category_code: String,
}

/// Per-machine bookkeeping
#[derive(Debug)]
struct MachineSlot<'a> {
    name: String,
    config: &'a MachineConfig,
    pattern: &'a Pattern,
    last_seen: Option<Timestamp>,
}

/// Result of applying one snapshot
#[derive(Debug, Default)]
pub struct SnapshotReport {
    /// Transitions caused by this snapshot, in register/bit order
    pub events: Vec<EventRecord>,
    /// Observations that could not be applied
    pub rejected: Vec<TrackerError>,
}

impl SnapshotReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// An error that is still on
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveError {
    pub start_time: Timestamp,
    pub category: String,
    pub category_code: String,
    /// Time on so far, relative to the summary's reference time
    pub elapsed: Duration,
}

/// Still-ongoing errors: machine -> bit number -> details
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveSummary {
    machines: BTreeMap<String, BTreeMap<u32, ActiveError>>,
}

impl ActiveSummary {
    pub fn get(&self, machine: &str, bit_number: u32) -> Option<&ActiveError> {
        self.machines.get(machine)?.get(&bit_number)
    }

    pub fn machine(&self, machine: &str) -> Option<&BTreeMap<u32, ActiveError>> {
        self.machines.get(machine)
    }

    /// Total number of active errors across machines
    pub fn len(&self) -> usize {
        self.machines.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32, &ActiveError)> {
        self.machines.iter().flat_map(|(machine, bits)| {
            bits.iter()
                .map(move |(bit, error)| (machine.as_str(), *bit, error))
        })
    }

    /// Combine summaries of disjoint machine sets
    pub fn merge(&mut self, other: ActiveSummary) {
        for (machine, bits) in other.machines {
            self.machines.entry(machine).or_default().extend(bits);
        }
    }

    fn insert(&mut self, machine: &str, bit_number: u32, error: ActiveError) {
        self.machines
            .entry(machine.to_string())
            .or_default()
            .insert(bit_number, error);
    }
}

/// Tracks error bits over a chronologically ordered snapshot stream
pub struct TransitionTracker<'a> {
    address_map: &'a AddressMap,
    config: &'a PlantConfig,
    extractor: BitExtractor,
    ids: HashMap<String, MachineId>,
    slots: Vec<MachineSlot<'a>>,
    active: HashMap<ActiveKey, ActiveEntry>,
    stream_end: Option<Timestamp>,
}

impl<'a> TransitionTracker<'a> {
    /// Create a tracker over validated configuration
    pub fn new(config: &'a PlantConfig, address_map: &'a AddressMap) -> Result<Self> {
        config.validate(address_map)?;
        Ok(Self {
            address_map,
            config,
            extractor: BitExtractor::new(config.tracker.on_malformed),
            ids: HashMap::new(),
            slots: Vec::new(),
            active: HashMap::new(),
            stream_end: None,
        })
    }

    /// Apply one snapshot and return the transitions it caused.
    ///
    /// Snapshots of unknown machines and unmonitored registers are ignored.
    /// A snapshot older than the previous one of the same machine is rejected
    /// as a whole. With `MalformedValuePolicy::Reject`, an unparseable
    /// register is rejected and the other registers are still applied.
    pub fn apply(&mut self, snapshot: &Snapshot) -> SnapshotReport {
        let mut report = SnapshotReport::default();

        let Some(id) = self.machine_id(&snapshot.machine) else {
            log::debug!("Skipping snapshot of unconfigured machine {}", snapshot.machine);
            return report;
        };

        let slot = &mut self.slots[id.0];
        if let Some(previous) = slot.last_seen {
            if snapshot.timestamp < previous {
                report.rejected.push(TrackerError::OutOfOrder {
                    machine: slot.name.clone(),
                    previous,
                    current: snapshot.timestamp,
                });
                return report;
            }
        }
        slot.last_seen = Some(snapshot.timestamp);
        let pattern = slot.pattern;
        let machine_code = slot.config.code;
        self.stream_end = self.stream_end.max(Some(snapshot.timestamp));

        for (&register, value) in &snapshot.registers {
            if pattern.category_for_register(register).is_none() {
                log::trace!("Register {} is not monitored by {}", register, pattern.name());
                continue;
            }

            let word = match self.extractor.word(
                &snapshot.machine,
                snapshot.timestamp,
                register,
                value,
            ) {
                Ok(word) => word,
                Err(e) => {
                    report.rejected.push(e);
                    continue;
                }
            };

            for bit_position in 0..BITS_PER_WORD {
                // Cannot fail: the register was matched to a category above
                let Ok(resolved) = pattern.bit_number_for(register, bit_position) else {
                    continue;
                };
                let key = ActiveKey {
                    machine: id,
                    bit_number: resolved.bit_number,
                };
                let is_on = bit_of_word(word, bit_position);

                match (is_on, self.active.contains_key(&key)) {
                    (true, false) => {
                        log::trace!(
                            "{} bit {} ({}) started at {}",
                            snapshot.machine,
                            resolved.bit_number,
                            resolved.address,
                            snapshot.timestamp
                        );
                        self.active.insert(
                            key,
                            ActiveEntry {
                                start_time: snapshot.timestamp,
                                category: resolved.category.name.clone(),
                                category_code: resolved.category.code.clone(),
                            },
                        );
                        report.events.push(EventRecord {
                            timestamp: snapshot.timestamp,
                            machine: snapshot.machine.clone(),
                            machine_code,
                            bit_number: resolved.bit_number,
                            category: resolved.category.name.clone(),
                            category_code: resolved.category.code.clone(),
                            status: EventStatus::Started,
                            duration: Duration::zero(),
                        });
                    }
                    (false, true) => {
                        if let Some(entry) = self.active.remove(&key) {
                            let duration = snapshot.timestamp - entry.start_time;
                            log::trace!(
                                "{} bit {} ended after {} ms",
                                snapshot.machine,
                                resolved.bit_number,
                                duration.num_milliseconds()
                            );
                            report.events.push(EventRecord {
                                timestamp: snapshot.timestamp,
                                machine: snapshot.machine.clone(),
                                machine_code,
                                bit_number: resolved.bit_number,
                                category: entry.category,
                                category_code: entry.category_code,
                                status: EventStatus::Ended,
                                duration,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }

        report
    }

    /// Active errors with elapsed time measured to the end of the stream
    pub fn active_summary(&self) -> ActiveSummary {
        match self.stream_end {
            Some(end) => self.active_summary_at(end),
            None => ActiveSummary::default(),
        }
    }

    /// Active errors with elapsed time measured to `now`
    pub fn active_summary_at(&self, now: Timestamp) -> ActiveSummary {
        let mut summary = ActiveSummary::default();
        for (key, entry) in &self.active {
            summary.insert(
                &self.slots[key.machine.0].name,
                key.bit_number,
                ActiveError {
                    start_time: entry.start_time,
                    category: entry.category.clone(),
                    category_code: entry.category_code.clone(),
                    elapsed: now - entry.start_time,
                },
            );
        }
        summary
    }

    /// Number of bits currently on
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Latest snapshot timestamp seen
    pub fn stream_end(&self) -> Option<Timestamp> {
        self.stream_end
    }

    /// Forget all state (active bits and ordering)
    pub fn reset(&mut self) {
        self.active.clear();
        for slot in &mut self.slots {
            slot.last_seen = None;
        }
        self.stream_end = None;
    }

    /// Look up or lazily create the slot of a configured machine
    fn machine_id(&mut self, machine: &str) -> Option<MachineId> {
        if let Some(id) = self.ids.get(machine) {
            return Some(*id);
        }

        let plant: &'a PlantConfig = self.config;
        let address_map: &'a AddressMap = self.address_map;
        let config = plant.machines.get(machine)?;
        // Patterns were checked in `new`
        let pattern = address_map.pattern(&config.pattern).ok()?;

        let id = MachineId(self.slots.len());
        self.slots.push(MachineSlot {
            name: machine.to_string(),
            config,
            pattern,
            last_seen: None,
        });
        self.ids.insert(machine.to_string(), id);
        log::debug!("Tracking machine {} with {}", machine, config.pattern);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::MalformedValuePolicy;
    use chrono::NaiveDate;

    fn ts(s: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2025, 11, 27)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap()
            + Duration::seconds(s as i64)
    }

    fn config() -> PlantConfig {
        PlantConfig::new()
            .with_machine("AM322", 1, "pattern_1")
            .with_machine("AM323", 2, "pattern_2")
    }

    #[test]
    fn test_start_then_end() {
        let config = config();
        let map = config.address_map().unwrap();
        let mut tracker = TransitionTracker::new(&config, &map).unwrap();

        let started = tracker.apply(&Snapshot::new(ts(0), "AM322").with_register(550, "0001"));
        assert_eq!(started.events.len(), 1);
        assert_eq!(started.events[0].bit_number, 0);
        assert_eq!(started.events[0].status, EventStatus::Started);
        assert_eq!(started.events[0].duration, Duration::zero());

        let ended = tracker.apply(&Snapshot::new(ts(5), "AM322").with_register(550, "0000"));
        assert_eq!(ended.events.len(), 1);
        assert_eq!(ended.events[0].status, EventStatus::Ended);
        assert_eq!(ended.events[0].duration, Duration::seconds(5));
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_steady_states_emit_nothing() {
        let config = config();
        let map = config.address_map().unwrap();
        let mut tracker = TransitionTracker::new(&config, &map).unwrap();

        assert!(tracker
            .apply(&Snapshot::new(ts(0), "AM322").with_register(550, "0000"))
            .events
            .is_empty());
        tracker.apply(&Snapshot::new(ts(1), "AM322").with_register(551, "0002"));
        let again = tracker.apply(&Snapshot::new(ts(2), "AM322").with_register(551, "0002"));
        assert!(again.events.is_empty());
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_absent_register_keeps_state() {
        let config = config();
        let map = config.address_map().unwrap();
        let mut tracker = TransitionTracker::new(&config, &map).unwrap();

        tracker.apply(&Snapshot::new(ts(0), "AM322").with_register(550, "0001"));
        let report = tracker.apply(&Snapshot::new(ts(3), "AM322").with_register(551, "0000"));
        assert!(report.events.is_empty());
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_machines_are_independent() {
        let config = config();
        let map = config.address_map().unwrap();
        let mut tracker = TransitionTracker::new(&config, &map).unwrap();

        tracker.apply(&Snapshot::new(ts(0), "AM322").with_register(570, "0001"));
        let other = tracker.apply(&Snapshot::new(ts(1), "AM323").with_register(570, "0000"));
        assert!(other.events.is_empty());

        // 570.0 is running error 320 under both factory patterns
        let summary = tracker.active_summary();
        assert_eq!(summary.get("AM322", 320).unwrap().category, "running_error");
        assert!(summary.machine("AM323").is_none());
    }

    #[test]
    fn test_unknown_machine_and_unmonitored_register() {
        let config = config();
        let map = config.address_map().unwrap();
        let mut tracker = TransitionTracker::new(&config, &map).unwrap();

        let unknown = tracker.apply(&Snapshot::new(ts(0), "XX999").with_register(550, "FFFF"));
        assert!(unknown.events.is_empty() && unknown.is_clean());

        let unmonitored = tracker.apply(&Snapshot::new(ts(0), "AM322").with_register(600, "FFFF"));
        assert!(unmonitored.events.is_empty() && unmonitored.is_clean());
    }

    #[test]
    fn test_out_of_order_rejected() {
        let config = config();
        let map = config.address_map().unwrap();
        let mut tracker = TransitionTracker::new(&config, &map).unwrap();

        tracker.apply(&Snapshot::new(ts(10), "AM322").with_register(550, "0001"));
        let report = tracker.apply(&Snapshot::new(ts(5), "AM322").with_register(550, "0000"));
        assert!(report.events.is_empty());
        assert!(matches!(report.rejected[0], TrackerError::OutOfOrder { .. }));
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_malformed_register_rejected_others_applied() {
        let config = config().with_malformed_policy(MalformedValuePolicy::Reject);
        let map = config.address_map().unwrap();
        let mut tracker = TransitionTracker::new(&config, &map).unwrap();

        let report = tracker.apply(
            &Snapshot::new(ts(0), "AM322")
                .with_register(550, "XYZ")
                .with_register(551, "0001"),
        );
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].bit_number, 16);
        match &report.rejected[0] {
            TrackerError::MalformedValue {
                machine,
                timestamp,
                register,
                ..
            } => {
                assert_eq!(machine, "AM322");
                assert_eq!(*timestamp, ts(0));
                assert_eq!(*register, 550);
            }
            other => panic!("expected MalformedValue, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_as_zero_clears_bits() {
        let config = config();
        let map = config.address_map().unwrap();
        let mut tracker = TransitionTracker::new(&config, &map).unwrap();

        tracker.apply(&Snapshot::new(ts(0), "AM322").with_register(550, "0001"));
        let report = tracker.apply(&Snapshot::new(ts(2), "AM322").with_register(550, "bogus!"));
        assert!(report.is_clean());
        assert_eq!(report.events[0].status, EventStatus::Ended);
    }

    #[test]
    fn test_active_summary_at_reference_time() {
        let config = config();
        let map = config.address_map().unwrap();
        let mut tracker = TransitionTracker::new(&config, &map).unwrap();

        tracker.apply(&Snapshot::new(ts(0), "AM322").with_register(565, "8000"));
        tracker.apply(&Snapshot::new(ts(30), "AM322").with_register(550, "0000"));

        let summary = tracker.active_summary();
        assert_eq!(summary.len(), 1);
        let (machine, bit, error) = summary.iter().next().unwrap();
        assert_eq!((machine, bit), ("AM322", 255));
        assert_eq!(error.elapsed, Duration::seconds(30));

        let later = tracker.active_summary_at(ts(60));
        assert_eq!(later.get("AM322", 255).unwrap().elapsed, Duration::seconds(60));

        tracker.reset();
        assert!(tracker.active_summary().is_empty());
    }

    #[test]
    fn test_unknown_pattern_rejected_at_construction() {
        let config = PlantConfig::new().with_machine("AM322", 1, "pattern_x");
        let map = config.address_map().unwrap();
        assert!(TransitionTracker::new(&config, &map).is_err());
    }
}
