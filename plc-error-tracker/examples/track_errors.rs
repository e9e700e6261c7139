//! Standalone error tracking demo
//!
//! Runs a short synthetic capture of two machines through the tracker and
//! prints the emitted records and the errors still active at the end.
//!
//! Usage:
//!   track_errors [plant.toml] [--json]
//!
//! Without a configuration file, AM322 (pattern_2) and AM323 (pattern_1)
//! are configured with the factory patterns.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use plc_error_tracker::{
    ErrorLogProcessor, Observation, PlantConfig, SupplementaryColumn, Timestamp, ValueHistory,
};
use std::env;
use std::io;
use std::path::PathBuf;

fn capture(t0: Timestamp) -> (Vec<Observation>, ValueHistory) {
    let at = |ms: i64| t0 + Duration::milliseconds(ms);
    let observations = vec![
        // Startup error 0 on AM322, cleared after 5 s
        Observation::new(at(0), "AM322", 550, "0001"),
        Observation::new(at(0), "AM322", 502, "9000"),
        Observation::new(at(5_000), "AM322", 550, "0000"),
        // Running error on AM323 (565.15 -> bit 255), never cleared
        Observation::new(at(1_250), "AM323", 565, "8000"),
        Observation::new(at(1_250), "AM323", 502, "A000"),
        // Unmonitored register, ignored
        Observation::new(at(2_000), "AM322", 600, "FFFF"),
        // Two bits of one register toggling at different times
        Observation::new(at(3_000), "AM322", 571, "0003"),
        Observation::new(at(4_500), "AM322", 571, "0002"),
        Observation::new(at(9_000), "AM322", 571, "0000"),
    ];

    let mut history = ValueHistory::from_observations(&observations);
    history.record(at(0), "AM322", "D_31651", "0042");
    history.record(at(0), "AM323", "D_31651", "0017");

    (observations, history)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let json = args.iter().any(|a| a == "--json");
    let config_path = args.iter().find(|a| !a.starts_with("--")).map(PathBuf::from);

    let processor = match config_path {
        Some(path) => ErrorLogProcessor::from_file(&path)
            .with_context(|| format!("Failed to load configuration {:?}", path))?,
        None => ErrorLogProcessor::new(
            PlantConfig::new()
                .with_machine("AM322", 1, "pattern_2")
                .with_machine("AM323", 2, "pattern_1")
                .with_labels("day", "10-1719")
                .with_supplementary(SupplementaryColumn::new("work_no_st1", "D_31651")),
        )?,
    };

    let t0 = NaiveDate::from_ymd_opt(2025, 11, 27)
        .and_then(|d| d.and_hms_opt(14, 0, 0))
        .context("invalid start time")?;
    let (observations, history) = capture(t0);

    let output = processor.process_parallel(observations, &history)?;

    if json {
        output.table.write_json_lines(io::stdout().lock())?;
    } else {
        println!("=== ERROR EVENTS ===");
        for row in output.table.rows() {
            println!(
                "{}  {:<6} code={} bit={:<4} {:<14} {:<8} {:>7.3}s  mode={:<10} work_no={}",
                row.timestamp.format("%H:%M:%S%.3f"),
                row.machine,
                row.machine_code,
                row.bit_number,
                row.category,
                row.status,
                row.duration_secs,
                row.operating_mode.map(|m| m.to_string()).unwrap_or_else(|| "-".into()),
                row.supplementary
                    .first()
                    .and_then(|c| c.value.as_deref())
                    .unwrap_or("-"),
            );
        }
    }

    println!("\n=== STILL ACTIVE ===");
    if output.active.is_empty() {
        println!("(none)");
    }
    for (machine, bit_number, error) in output.active.iter() {
        println!(
            "{} bit {} ({}) on since {} ({} ms)",
            machine,
            bit_number,
            error.category,
            error.start_time.format("%H:%M:%S%.3f"),
            error.elapsed.num_milliseconds()
        );
    }

    if !output.rejected.is_empty() {
        println!("\n{} observations were skipped", output.rejected.len());
    }

    Ok(())
}
