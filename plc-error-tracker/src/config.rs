//! Plant configuration
//!
//! Patterns, machines and tracker/emitter options, loaded once from a TOML
//! file (or built in code) and then only read.
//!
//! ```toml
//! [machines.AM322]
//! code = 1
//! pattern = "pattern_2"
//!
//! [tracker]
//! on_malformed = "reject"
//! on_error = "skip_and_continue"
//!
//! [emitter]
//! shift = "day"
//! unit_code = "10-1719"
//!
//! [[emitter.supplementary]]
//! name = "work_no_st1"
//! field = "D_31651"
//! ```
//!
//! When no `[patterns]` table is given the factory patterns are used.

use crate::address_map::{AddressMap, Category, Pattern};
use crate::bits::MalformedValuePolicy;
use crate::emitter::LookupPolicy;
use crate::types::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlantConfig {
    /// Pattern name -> categories; empty selects the factory patterns
    #[serde(default)]
    pub patterns: BTreeMap<String, PatternConfig>,

    /// Machine name -> static code and pattern
    #[serde(default)]
    pub machines: BTreeMap<String, MachineConfig>,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub emitter: EmitterConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternConfig {
    pub categories: Vec<Category>,
}

/// Per-machine static configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Display code written to every record of this machine
    pub code: u32,
    /// Name of the addressing pattern of this machine family
    pub pattern: String,
}

impl MachineConfig {
    pub fn new(code: u32, pattern: impl Into<String>) -> Self {
        Self {
            code,
            pattern: pattern.into(),
        }
    }
}

/// Whether a rejected observation aborts a batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    FailFast,
    #[default]
    SkipAndContinue,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub on_malformed: MalformedValuePolicy,
    #[serde(default)]
    pub on_error: ErrorPolicy,
}

/// Static labels and context lookups for output records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Shift label (day/night)
    #[serde(default = "default_shift")]
    pub shift: String,

    #[serde(default)]
    pub unit_code: String,

    /// Field holding the operating-mode word
    #[serde(default = "default_mode_field")]
    pub mode_field: String,

    #[serde(default = "default_mode_lookup")]
    pub mode_lookup: LookupPolicy,

    /// Field holding the worker id, if the line reports one
    #[serde(default)]
    pub worker_field: Option<String>,

    #[serde(default)]
    pub supplementary: Vec<SupplementaryColumn>,
}

fn default_shift() -> String {
    "day".to_string()
}

fn default_mode_field() -> String {
    "IO_0502".to_string()
}

fn default_mode_lookup() -> LookupPolicy {
    LookupPolicy::Exact
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            shift: default_shift(),
            unit_code: String::new(),
            mode_field: default_mode_field(),
            mode_lookup: default_mode_lookup(),
            worker_field: None,
            supplementary: Vec::new(),
        }
    }
}

/// An extra output column filled from a context field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplementaryColumn {
    /// Output column name
    pub name: String,
    /// Context field to read (e.g. "D_31651")
    pub field: String,
    #[serde(default)]
    pub lookup: LookupPolicy,
}

impl SupplementaryColumn {
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            lookup: LookupPolicy::default(),
        }
    }

    pub fn with_lookup(mut self, lookup: LookupPolicy) -> Self {
        self.lookup = lookup;
        self
    }
}

impl PlantConfig {
    /// Create an empty configuration (factory patterns, no machines)
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Builder method: add a machine
    pub fn with_machine(mut self, name: impl Into<String>, code: u32, pattern: impl Into<String>) -> Self {
        self.machines.insert(name.into(), MachineConfig::new(code, pattern));
        self
    }

    /// Builder method: add a custom pattern
    pub fn with_pattern(mut self, name: impl Into<String>, categories: Vec<Category>) -> Self {
        self.patterns.insert(name.into(), PatternConfig { categories });
        self
    }

    /// Builder method: set the malformed-value policy
    pub fn with_malformed_policy(mut self, policy: MalformedValuePolicy) -> Self {
        self.tracker.on_malformed = policy;
        self
    }

    /// Builder method: set the batch error policy
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.tracker.on_error = policy;
        self
    }

    /// Builder method: set shift and unit labels
    pub fn with_labels(mut self, shift: impl Into<String>, unit_code: impl Into<String>) -> Self {
        self.emitter.shift = shift.into();
        self.emitter.unit_code = unit_code.into();
        self
    }

    /// Builder method: add a supplementary output column
    pub fn with_supplementary(mut self, column: SupplementaryColumn) -> Self {
        self.emitter.supplementary.push(column);
        self
    }

    /// Build and validate the address map described by this configuration
    pub fn address_map(&self) -> Result<AddressMap> {
        if self.patterns.is_empty() {
            return Ok(AddressMap::factory_default());
        }

        let mut map = AddressMap::new();
        for (name, pattern) in &self.patterns {
            map.insert(Pattern::new(name.clone(), pattern.categories.clone())?);
        }
        Ok(map)
    }

    /// Check that every machine refers to a known pattern
    pub fn validate(&self, address_map: &AddressMap) -> Result<()> {
        for (machine, cfg) in &self.machines {
            if !address_map.contains_pattern(&cfg.pattern) {
                return Err(TrackerError::ConfigError(format!(
                    "machine '{}' uses unknown pattern '{}'",
                    machine, cfg.pattern
                )));
            }
        }
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<PlantConfig> {
    log::info!("Loading plant configuration: {:?}", path);
    let content = fs::read_to_string(path)?;
    let config = PlantConfig::from_toml_str(&content)?;
    log::debug!(
        "Configuration loaded: {} patterns, {} machines",
        config.patterns.len(),
        config.machines.len()
    );
    Ok(config)
}
