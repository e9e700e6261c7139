//! Register/bit to logical error number mapping
//!
//! A machine family reports its errors as individual bits spread over a block
//! of IO registers. A [`Pattern`] names that layout: a handful of categories
//! (startup errors, running errors, ...) each owning a contiguous register
//! range and a dense block of logical bit numbers.
//!
//! ```text
//! bit_number = (register - register_start) * 16 + bit_position + bit_number_start
//! ```
//!
//! The mapping is exactly invertible: [`Pattern::address_for`] recovers the
//! register and bit position from any bit number produced by
//! [`Pattern::bit_number_for`].

use crate::bits::BITS_PER_WORD;
use crate::types::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;

/// Name of the startup-error category in the factory patterns
pub const STARTUP_ERROR: &str = "startup_error";
/// Name of the running-error category in the factory patterns
pub const RUNNING_ERROR: &str = "running_error";

/// One category of a pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Category name (e.g. "startup_error")
    pub name: String,
    /// Stable short identifier written to the output
    pub code: String,
    /// First monitored register (inclusive)
    pub register_start: u32,
    /// Last monitored register (inclusive)
    pub register_end: u32,
    /// Logical bit number of bit 0 of `register_start`
    pub bit_number_start: u32,
    /// Always 16 for PLC words
    #[serde(default = "default_bits_per_register")]
    pub bits_per_register: u32,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_bits_per_register() -> u32 {
    BITS_PER_WORD as u32
}

impl Category {
    /// Create a 16-bit category
    pub fn new(
        name: impl Into<String>,
        code: impl Into<String>,
        registers: RangeInclusive<u32>,
        bit_number_start: u32,
    ) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            register_start: *registers.start(),
            register_end: *registers.end(),
            bit_number_start,
            bits_per_register: default_bits_per_register(),
            description: None,
        }
    }

    /// Builder method: attach a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn register_range(&self) -> RangeInclusive<u32> {
        self.register_start..=self.register_end
    }

    /// Inclusive logical bit-number range derived from the register range
    pub fn bit_range(&self) -> RangeInclusive<u32> {
        self.bit_number_start..=self.bit_number_end()
    }

    /// Last logical bit number. Saturates instead of wrapping for categories
    /// that would fail validation (inverted or oversized ranges).
    pub fn bit_number_end(&self) -> u32 {
        self.bit_number_start
            .saturating_add(self.bit_count().saturating_sub(1))
    }

    /// Zero for an inverted register range
    fn bit_count(&self) -> u32 {
        self.register_end
            .checked_sub(self.register_start)
            .map_or(0, |span| span.saturating_add(1).saturating_mul(self.bits_per_register))
    }

    pub fn contains_register(&self, register: u32) -> bool {
        self.register_range().contains(&register)
    }

    pub fn contains_bit_number(&self, bit_number: u32) -> bool {
        self.bit_range().contains(&bit_number)
    }

    /// Checks that only depend on the category itself
    fn validate(&self, pattern: &str) -> Result<()> {
        if self.bits_per_register != BITS_PER_WORD as u32 {
            return Err(TrackerError::ConfigError(format!(
                "pattern '{}', category '{}': bits_per_register must be 16, got {}",
                pattern, self.name, self.bits_per_register
            )));
        }
        if self.register_start > self.register_end {
            return Err(TrackerError::ConfigError(format!(
                "pattern '{}', category '{}': register_start {} is after register_end {}",
                pattern, self.name, self.register_start, self.register_end
            )));
        }
        let overflows = (self.register_end - self.register_start)
            .checked_add(1)
            .and_then(|n| n.checked_mul(self.bits_per_register))
            .and_then(|n| n.checked_add(self.bit_number_start))
            .is_none();
        if overflows {
            return Err(TrackerError::ConfigError(format!(
                "pattern '{}', category '{}': bit numbers overflow",
                pattern, self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (code {}): registers {}-{}, bits {}-{}",
            self.name,
            self.code,
            self.register_start,
            self.register_end,
            self.bit_number_start,
            self.bit_number_end()
        )
    }
}

/// A physical bit location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitAddress {
    pub register: u32,
    pub bit_position: u8,
}

impl BitAddress {
    pub fn new(register: u32, bit_position: u8) -> Self {
        Self {
            register,
            bit_position,
        }
    }
}

impl fmt::Display for BitAddress {
    /// PLC notation, e.g. `550.08`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.register, self.bit_position)
    }
}

/// Both sides of the mapping for one bit, plus the owning category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBit<'a> {
    pub bit_number: u32,
    pub address: BitAddress,
    pub category: &'a Category,
}

/// A validated, immutable addressing scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    name: String,
    categories: Vec<Category>,
}

impl Pattern {
    /// Build a pattern, rejecting overlapping or malformed categories
    pub fn new(name: impl Into<String>, categories: Vec<Category>) -> Result<Self> {
        let name = name.into();
        if categories.is_empty() {
            return Err(TrackerError::ConfigError(format!(
                "pattern '{}' has no categories",
                name
            )));
        }

        for category in &categories {
            category.validate(&name)?;
        }

        for (i, a) in categories.iter().enumerate() {
            for b in &categories[i + 1..] {
                if a.name == b.name {
                    return Err(TrackerError::ConfigError(format!(
                        "pattern '{}': duplicate category '{}'",
                        name, a.name
                    )));
                }
                if ranges_overlap(&a.register_range(), &b.register_range()) {
                    return Err(TrackerError::ConfigError(format!(
                        "pattern '{}': register ranges of '{}' and '{}' overlap",
                        name, a.name, b.name
                    )));
                }
                if ranges_overlap(&a.bit_range(), &b.bit_range()) {
                    return Err(TrackerError::ConfigError(format!(
                        "pattern '{}': bit number ranges of '{}' ({}-{}) and '{}' ({}-{}) overlap",
                        name,
                        a.name,
                        a.bit_number_start,
                        a.bit_number_end(),
                        b.name,
                        b.bit_number_start,
                        b.bit_number_end()
                    )));
                }
            }
        }

        Ok(Self { name, categories })
    }

    /// Built-in layout, constructed without validation
    fn factory(name: &str, categories: Vec<Category>) -> Self {
        Self {
            name: name.to_string(),
            categories,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Categories in configuration order
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category_names(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn category(&self, name: &str) -> Result<&Category> {
        self.categories
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| self.out_of_range(format!("no category named '{}'", name)))
    }

    /// The category monitoring `register`, if any
    pub fn category_for_register(&self, register: u32) -> Option<&Category> {
        self.categories.iter().find(|c| c.contains_register(register))
    }

    /// Map a register bit to its logical error number
    pub fn bit_number_for(&self, register: u32, bit_position: u8) -> Result<ResolvedBit<'_>> {
        if bit_position >= BITS_PER_WORD {
            return Err(self.out_of_range(format!("bit position {} is not in 0..=15", bit_position)));
        }
        let category = self
            .category_for_register(register)
            .ok_or_else(|| self.out_of_range(format!("register {} is not monitored", register)))?;

        let offset = register - category.register_start;
        let bit_number =
            offset * category.bits_per_register + bit_position as u32 + category.bit_number_start;

        Ok(ResolvedBit {
            bit_number,
            address: BitAddress::new(register, bit_position),
            category,
        })
    }

    /// Map a logical error number back to its register bit
    pub fn address_for(&self, bit_number: u32) -> Result<ResolvedBit<'_>> {
        let category = self
            .categories
            .iter()
            .find(|c| c.contains_bit_number(bit_number))
            .ok_or_else(|| {
                self.out_of_range(format!("bit number {} is not in any category", bit_number))
            })?;

        let offset = bit_number - category.bit_number_start;
        let register = category.register_start + offset / category.bits_per_register;
        let bit_position = (offset % category.bits_per_register) as u8;

        Ok(ResolvedBit {
            bit_number,
            address: BitAddress::new(register, bit_position),
            category,
        })
    }

    /// True if the bit is inside any category
    pub fn is_monitored(&self, register: u32, bit_position: u8) -> bool {
        self.bit_number_for(register, bit_position).is_ok()
    }

    pub fn register_range(&self, category: &str) -> Result<RangeInclusive<u32>> {
        Ok(self.category(category)?.register_range())
    }

    pub fn bit_range(&self, category: &str) -> Result<RangeInclusive<u32>> {
        Ok(self.category(category)?.bit_range())
    }

    /// Every monitored register, in category order
    pub fn monitored_registers(&self) -> impl Iterator<Item = u32> + '_ {
        self.categories.iter().flat_map(|c| c.register_range())
    }

    /// Full `(address, bit_number)` table of one category, for export/display
    pub fn full_mapping(&self, category: &str) -> Result<Vec<(BitAddress, u32)>> {
        let category = self.category(category)?;
        let mut mapping = Vec::with_capacity(category.bit_count() as usize);
        for register in category.register_range() {
            for bit_position in 0..BITS_PER_WORD {
                let resolved = self.bit_number_for(register, bit_position)?;
                mapping.push((resolved.address, resolved.bit_number));
            }
        }
        Ok(mapping)
    }

    fn out_of_range(&self, reason: String) -> TrackerError {
        TrackerError::OutOfRange {
            pattern: self.name.clone(),
            reason,
        }
    }
}

fn ranges_overlap(a: &RangeInclusive<u32>, b: &RangeInclusive<u32>) -> bool {
    a.start() <= b.end() && b.start() <= a.end()
}

/// Registry of named patterns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressMap {
    patterns: BTreeMap<String, Pattern>,
}

impl AddressMap {
    /// Create an empty address map
    pub fn new() -> Self {
        Self::default()
    }

    /// The two patterns shipped with the tracker
    pub fn factory_default() -> Self {
        Self::new()
            .with_pattern(Pattern::factory(
                "pattern_1",
                vec![
                    Category::new(STARTUP_ERROR, "1", 550..=564, 0),
                    Category::new(RUNNING_ERROR, "2", 565..=589, 240),
                ],
            ))
            .with_pattern(Pattern::factory(
                "pattern_2",
                vec![
                    Category::new(STARTUP_ERROR, "1", 550..=569, 0),
                    Category::new(RUNNING_ERROR, "2", 570..=589, 320),
                ],
            ))
    }

    /// Add (or replace) a pattern
    pub fn insert(&mut self, pattern: Pattern) {
        log::debug!(
            "Registered pattern '{}' with {} categories",
            pattern.name,
            pattern.categories.len()
        );
        self.patterns.insert(pattern.name.clone(), pattern);
    }

    /// Builder method: add a pattern
    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.insert(pattern);
        self
    }

    pub fn pattern(&self, name: &str) -> Result<&Pattern> {
        self.patterns
            .get(name)
            .ok_or_else(|| TrackerError::UnknownPattern(name.to_string()))
    }

    pub fn contains_pattern(&self, name: &str) -> bool {
        self.patterns.contains_key(name)
    }

    pub fn pattern_names(&self) -> Vec<&str> {
        self.patterns.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn bit_number_for(
        &self,
        pattern: &str,
        register: u32,
        bit_position: u8,
    ) -> Result<ResolvedBit<'_>> {
        self.pattern(pattern)?.bit_number_for(register, bit_position)
    }

    pub fn address_for(&self, pattern: &str, bit_number: u32) -> Result<ResolvedBit<'_>> {
        self.pattern(pattern)?.address_for(bit_number)
    }

    pub fn categories(&self, pattern: &str) -> Result<&[Category]> {
        Ok(self.pattern(pattern)?.categories())
    }

    /// False for unknown patterns as well as unmonitored bits
    pub fn is_monitored(&self, pattern: &str, register: u32, bit_position: u8) -> bool {
        self.pattern(pattern)
            .map(|p| p.is_monitored(register, bit_position))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_category_pattern() -> Pattern {
        Pattern::new(
            "test",
            vec![
                Category::new(STARTUP_ERROR, "1", 550..=569, 0),
                Category::new(RUNNING_ERROR, "2", 570..=589, 320),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_boundaries() {
        let pattern = two_category_pattern();
        assert_eq!(pattern.bit_number_for(550, 0).unwrap().bit_number, 0);
        assert_eq!(pattern.bit_number_for(550, 15).unwrap().bit_number, 15);
        assert_eq!(pattern.bit_number_for(569, 15).unwrap().bit_number, 319);

        let first_running = pattern.bit_number_for(570, 0).unwrap();
        assert_eq!(first_running.bit_number, 320);
        assert_eq!(first_running.category.name, RUNNING_ERROR);
        assert_eq!(first_running.category.code, "2");
    }

    #[test]
    fn test_round_trip_every_bit() {
        let map = AddressMap::factory_default();
        for name in map.pattern_names() {
            let pattern = map.pattern(name).unwrap();
            for register in pattern.monitored_registers() {
                for bit in 0..16u8 {
                    let forward = pattern.bit_number_for(register, bit).unwrap();
                    let back = pattern.address_for(forward.bit_number).unwrap();
                    assert_eq!(back.address, BitAddress::new(register, bit));
                    assert_eq!(back.category, forward.category);
                }
            }
        }
    }

    #[test]
    fn test_reverse_lookup() {
        let map = AddressMap::factory_default();
        let resolved = map.address_for("pattern_2", 306).unwrap();
        assert_eq!(resolved.address, BitAddress::new(569, 2));
        assert_eq!(resolved.category.name, STARTUP_ERROR);

        let resolved = map.address_for("pattern_2", 404).unwrap();
        assert_eq!(resolved.address, BitAddress::new(575, 4));
        assert_eq!(resolved.category.name, RUNNING_ERROR);
    }

    #[test]
    fn test_out_of_range() {
        let map = AddressMap::factory_default();
        assert!(matches!(
            map.bit_number_for("pattern_1", 600, 0),
            Err(TrackerError::OutOfRange { .. })
        ));
        assert!(matches!(
            map.bit_number_for("pattern_1", 550, 16),
            Err(TrackerError::OutOfRange { .. })
        ));
        assert!(matches!(
            map.address_for("pattern_1", 640),
            Err(TrackerError::OutOfRange { .. })
        ));
        assert!(matches!(
            map.bit_number_for("pattern_9", 550, 0),
            Err(TrackerError::UnknownPattern(_))
        ));
        assert!(!map.is_monitored("pattern_1", 549, 3));
        assert!(map.is_monitored("pattern_1", 589, 15));
    }

    #[test]
    fn test_unsorted_categories_are_scanned() {
        let pattern = Pattern::new(
            "reversed",
            vec![
                Category::new(RUNNING_ERROR, "2", 565..=589, 240),
                Category::new(STARTUP_ERROR, "1", 550..=564, 0),
            ],
        )
        .unwrap();
        assert_eq!(pattern.bit_number_for(550, 0).unwrap().category.name, STARTUP_ERROR);
        assert_eq!(pattern.address_for(240).unwrap().address, BitAddress::new(565, 0));
    }

    #[test]
    fn test_overlapping_bit_ranges_rejected() {
        // Running errors starting at 0 collide with startup errors 0..=239
        let result = Pattern::new(
            "bad",
            vec![
                Category::new(STARTUP_ERROR, "1", 550..=564, 0),
                Category::new(RUNNING_ERROR, "2", 565..=589, 0),
            ],
        );
        assert!(matches!(result, Err(TrackerError::ConfigError(_))));
    }

    #[test]
    fn test_overlapping_registers_rejected() {
        let result = Pattern::new(
            "bad",
            vec![
                Category::new(STARTUP_ERROR, "1", 550..=570, 0),
                Category::new(RUNNING_ERROR, "2", 570..=589, 1000),
            ],
        );
        assert!(matches!(result, Err(TrackerError::ConfigError(_))));
    }

    #[test]
    fn test_invalid_category_shapes() {
        let mut wide = Category::new(STARTUP_ERROR, "1", 550..=564, 0);
        wide.bits_per_register = 32;
        assert!(Pattern::new("bad", vec![wide]).is_err());

        let backwards = Category::new(STARTUP_ERROR, "1", 564..=550, 0);
        assert!(Pattern::new("bad", vec![backwards]).is_err());

        let huge = Category::new(STARTUP_ERROR, "1", 0..=10, u32::MAX - 5);
        assert!(Pattern::new("bad", vec![huge]).is_err());

        assert!(Pattern::new("empty", Vec::new()).is_err());
    }

    #[test]
    fn test_gap_between_categories_is_allowed() {
        let pattern = Pattern::new(
            "gapped",
            vec![
                Category::new(STARTUP_ERROR, "1", 550..=564, 0),
                Category::new(RUNNING_ERROR, "2", 565..=589, 320),
            ],
        )
        .unwrap();
        assert!(pattern.address_for(300).is_err());
        assert_eq!(pattern.bit_range(RUNNING_ERROR).unwrap(), 320..=719);
    }

    #[test]
    fn test_full_mapping() {
        let map = AddressMap::factory_default();
        let pattern = map.pattern("pattern_1").unwrap();
        let mapping = pattern.full_mapping(STARTUP_ERROR).unwrap();
        assert_eq!(mapping.len(), 15 * 16);
        assert_eq!(mapping[0], (BitAddress::new(550, 0), 0));
        assert_eq!(mapping.last(), Some(&(BitAddress::new(564, 15), 239)));
        assert_eq!(pattern.register_range(RUNNING_ERROR).unwrap(), 565..=589);
        assert!(pattern.full_mapping("nope").is_err());
    }

    #[test]
    fn test_factory_patterns_pass_validation() {
        let map = AddressMap::factory_default();
        assert_eq!(map.pattern_names(), vec!["pattern_1", "pattern_2"]);
        for name in map.pattern_names() {
            let pattern = map.pattern(name).unwrap();
            let rebuilt = Pattern::new(name, pattern.categories().to_vec()).unwrap();
            assert_eq!(&rebuilt, pattern);
        }
    }

    #[test]
    fn test_inverted_category_does_not_panic() {
        let category = Category::new(STARTUP_ERROR, "1", 564..=550, 0);
        assert_eq!(category.bit_range(), 0..=0);
        assert!(category.to_string().contains("registers 564-550"));

        let huge = Category::new(RUNNING_ERROR, "2", 0..=u32::MAX, u32::MAX);
        assert_eq!(huge.bit_number_end(), u32::MAX);
        assert!(Pattern::new("broken", vec![category]).is_err());
    }

    #[test]
    fn test_bit_address_display() {
        assert_eq!(BitAddress::new(502, 12).to_string(), "502.12");
        assert_eq!(BitAddress::new(550, 3).to_string(), "550.03");
    }
}
