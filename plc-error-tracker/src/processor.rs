//! Batch processing of captured observations
//!
//! The processor owns the plant configuration and the address map built from
//! it, and runs observations through grouping, transition tracking and record
//! emission.

use crate::address_map::AddressMap;
use crate::config::{load_config, ErrorPolicy, PlantConfig};
use crate::emitter::{ContextSource, EventEmitter, EventTable, ValueHistory};
use crate::tracker::{ActiveSummary, TransitionTracker};
use crate::types::{group_observations, EventRecord, Observation, Result, Snapshot, Timestamp, TrackerError};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;

/// Everything produced by one batch run
#[derive(Debug, Default)]
pub struct ProcessOutput {
    /// Start/end events in (timestamp, machine) order
    pub events: Vec<EventRecord>,
    /// Enriched rows, one per event
    pub table: EventTable,
    /// Errors still on at the end of the input
    pub active: ActiveSummary,
    /// Observations skipped under `ErrorPolicy::SkipAndContinue`
    pub rejected: Vec<TrackerError>,
}

/// Rejections of one machine partition, tagged for ordering
type Tagged = (Timestamp, String, TrackerError);

struct PartitionRun<'a> {
    tracker: TransitionTracker<'a>,
    events: Vec<EventRecord>,
    rejected: Vec<Tagged>,
}

/// Main entry point for batch runs
pub struct ErrorLogProcessor {
    config: PlantConfig,
    address_map: AddressMap,
}

impl ErrorLogProcessor {
    /// Validate the configuration and build its address map
    pub fn new(config: PlantConfig) -> Result<Self> {
        let address_map = config.address_map()?;
        config.validate(&address_map)?;
        log::info!(
            "Processor ready: {} patterns, {} machines",
            address_map.pattern_names().len(),
            config.machines.len()
        );
        Ok(Self {
            config,
            address_map,
        })
    }

    /// Load the configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::new(load_config(path)?)
    }

    pub fn config(&self) -> &PlantConfig {
        &self.config
    }

    pub fn address_map(&self) -> &AddressMap {
        &self.address_map
    }

    /// A fresh tracker for streaming use
    pub fn tracker(&self) -> Result<TransitionTracker<'_>> {
        TransitionTracker::new(&self.config, &self.address_map)
    }

    /// Track observations and emit records enriched from `context`
    pub fn process<I, C>(&self, observations: I, context: &C) -> Result<ProcessOutput>
    where
        I: IntoIterator<Item = Observation>,
        C: ContextSource + ?Sized,
    {
        let snapshots = group_observations(observations);
        log::info!("Processing {} snapshots", snapshots.len());

        let run = self.run_partition(&snapshots)?;
        let active = run.tracker.active_summary();
        self.finish(run.events, run.rejected, active, context)
    }

    /// Like [`process`](Self::process), with IO register values as context
    pub fn process_observations(&self, observations: Vec<Observation>) -> Result<ProcessOutput> {
        let history = ValueHistory::from_observations(&observations);
        self.process(observations, &history)
    }

    /// Track each machine on the rayon pool, then merge.
    ///
    /// Produces the same output as [`process`](Self::process).
    pub fn process_parallel<I, C>(&self, observations: I, context: &C) -> Result<ProcessOutput>
    where
        I: IntoIterator<Item = Observation>,
        C: ContextSource + ?Sized,
    {
        let mut partitions: BTreeMap<String, Vec<Snapshot>> = BTreeMap::new();
        for snapshot in group_observations(observations) {
            partitions
                .entry(snapshot.machine.clone())
                .or_default()
                .push(snapshot);
        }
        log::info!("Processing {} machines in parallel", partitions.len());

        let runs = partitions
            .par_iter()
            .map(|(_, snapshots)| self.run_partition(snapshots))
            .collect::<Result<Vec<_>>>()?;

        let stream_end = runs.iter().filter_map(|run| run.tracker.stream_end()).max();
        let mut events = Vec::new();
        let mut rejected = Vec::new();
        let mut active = ActiveSummary::default();
        for run in runs {
            if let Some(end) = stream_end {
                active.merge(run.tracker.active_summary_at(end));
            }
            events.extend(run.events);
            rejected.extend(run.rejected);
        }

        events.sort_by(|a, b| (a.timestamp, &a.machine).cmp(&(b.timestamp, &b.machine)));
        rejected.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        self.finish(events, rejected, active, context)
    }

    /// Track one ordered run of snapshots. Under `FailFast` tracking stops
    /// at the first rejection.
    fn run_partition(&self, snapshots: &[Snapshot]) -> Result<PartitionRun<'_>> {
        let mut run = PartitionRun {
            tracker: self.tracker()?,
            events: Vec::new(),
            rejected: Vec::new(),
        };

        for snapshot in snapshots {
            let report = run.tracker.apply(snapshot);
            run.events.extend(report.events);

            let failed = !report.rejected.is_empty();
            run.rejected.extend(
                report
                    .rejected
                    .into_iter()
                    .map(|e| (snapshot.timestamp, snapshot.machine.clone(), e)),
            );
            if failed && self.config.tracker.on_error == ErrorPolicy::FailFast {
                break;
            }
        }

        Ok(run)
    }

    fn finish<C: ContextSource + ?Sized>(
        &self,
        events: Vec<EventRecord>,
        rejected: Vec<Tagged>,
        active: ActiveSummary,
        context: &C,
    ) -> Result<ProcessOutput> {
        let mut rejected = rejected.into_iter().map(|(_, _, e)| e);
        let rejected = match self.config.tracker.on_error {
            ErrorPolicy::FailFast => match rejected.next() {
                Some(first) => return Err(first),
                None => Vec::new(),
            },
            ErrorPolicy::SkipAndContinue => rejected
                .inspect(|e| log::warn!("Skipped observation: {}", e))
                .collect(),
        };

        let emitter = EventEmitter::new(&self.config.emitter);
        let mut table = EventTable::new();
        for event in &events {
            table.push(emitter.emit(event, context));
        }

        log::info!(
            "Emitted {} events ({} errors still active, {} observations skipped)",
            events.len(),
            active.len(),
            rejected.len()
        );

        Ok(ProcessOutput {
            events,
            table,
            active,
            rejected,
        })
    }
}
