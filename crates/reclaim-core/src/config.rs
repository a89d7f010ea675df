// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Controller configuration.
//!
//! [`ThrottleConfig`] is the single configuration model. It can be built from
//! any key/value [`ConfigSource`] the host already has, or deserialized
//! directly (see `reclaim-infra` for the RON loader). Every field has a
//! default, so a partial source or file is always valid input.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::{ProfileSet, ThresholdProfile};

/// Configuration keys understood by [`ThrottleConfig::from_source`].
pub mod keys {
    /// Master switch for throttling. When off, every request collects.
    pub const MAXIMIZE_MEMORY_USAGE: &str = "throttling.maximize_memory_usage";
    /// Normal profile: maximum physical load percentage.
    pub const MEMORY_THRESHOLD: &str = "throttling.memory_threshold";
    /// Normal profile: minimum free page file ratio.
    pub const PAGE_FILE_FREE_THRESHOLD: &str = "throttling.page_file_free_threshold";
    /// Normal profile: minimum available page file bytes.
    pub const MIN_AVAIL_PAGE_FILE_BYTES: &str = "throttling.min_avail_page_file_bytes";
    /// Normal profile: maximum managed heap bytes.
    pub const MAX_HEAP_BYTES: &str = "throttling.max_heap_bytes";
    /// Enables elevated mode.
    pub const ELEVATED_ENABLED: &str = "elevated.enabled";
    /// Elevated profile: maximum physical load percentage.
    pub const ELEVATED_MEMORY_THRESHOLD: &str = "elevated.memory_threshold";
    /// Elevated profile: minimum free page file ratio.
    pub const ELEVATED_PAGE_FILE_FREE_THRESHOLD: &str = "elevated.page_file_free_threshold";
    /// Elevated profile: minimum available page file bytes.
    pub const ELEVATED_MIN_AVAIL_PAGE_FILE_BYTES: &str = "elevated.min_avail_page_file_bytes";
    /// Elevated profile: maximum managed heap bytes.
    pub const ELEVATED_MAX_HEAP_BYTES: &str = "elevated.max_heap_bytes";
    /// Scene name fragments that start an elevated period.
    pub const ELEVATED_SCENE_PATTERNS: &str = "elevated.scene_patterns";
    /// Scene name fragments that never start an elevated period.
    pub const EXCLUDED_SCENE_PATTERNS: &str = "elevated.excluded_patterns";
    /// Collect after an elevated period ends.
    pub const COLLECT_AFTER_ELEVATED: &str = "collection.after_elevated";
    /// Collect after every scene unload.
    pub const COLLECT_ON_SCENE_UNLOAD: &str = "collection.on_scene_unload";
    /// Use the spread collection strategy for coalesced requests.
    pub const INCREMENTAL_COLLECTION: &str = "collection.incremental";
    /// Number of ticks a burst of requests is absorbed for.
    pub const COALESCE_TICKS: &str = "collection.coalesce_ticks";
    /// Coalescer tick interval in milliseconds.
    pub const TICK_INTERVAL_MS: &str = "collection.tick_interval_ms";
    /// Pause between spread collection steps in milliseconds.
    pub const INCREMENTAL_STEP_MS: &str = "collection.incremental_step_ms";
    /// Upper bound on each finalizer wait in milliseconds.
    pub const FINALIZER_TIMEOUT_MS: &str = "collection.finalizer_timeout_ms";
    /// Enables the fixed-interval forced collection.
    pub const PERIODIC_ENABLED: &str = "periodic.enabled";
    /// Fixed-interval forced collection period in seconds.
    pub const PERIODIC_INTERVAL_SECS: &str = "periodic.interval_secs";
    /// Pressure monitor polling period in milliseconds.
    pub const PRESSURE_MONITOR_MS: &str = "periodic.pressure_monitor_ms";
    /// Diagnostic switch that disables every unload.
    pub const DISABLE_UNLOAD: &str = "test.disable_unload";
}

/// A raw configuration value as stored by a host configuration system.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// A boolean flag.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A string. Lists may be stored comma separated.
    Text(String),
    /// A list of strings.
    List(Vec<String>),
}

/// A key/value configuration store, the `config.get(key, default)` seam.
///
/// Values of the wrong type fall back to the default and are logged.
pub trait ConfigSource {
    /// Returns the raw value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<ConfigValue>;

    /// Reads a boolean.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(ConfigValue::Bool(value)) => value,
            Some(other) => mismatched(key, "bool", &other, default),
            None => default,
        }
    }

    /// Reads a non-negative integer.
    fn get_u64(&self, key: &str, default: u64) -> u64 {
        match self.get(key) {
            Some(ConfigValue::Int(value)) if value >= 0 => value as u64,
            Some(other) => mismatched(key, "unsigned integer", &other, default),
            None => default,
        }
    }

    /// Reads a float. Integers are widened.
    fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.get(key) {
            Some(ConfigValue::Float(value)) => value,
            Some(ConfigValue::Int(value)) => value as f64,
            Some(other) => mismatched(key, "float", &other, default),
            None => default,
        }
    }

    /// Reads a list of strings. Text values are split on commas.
    fn get_list(&self, key: &str, default: &[String]) -> Vec<String> {
        match self.get(key) {
            Some(ConfigValue::List(values)) => values,
            Some(ConfigValue::Text(text)) => text
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Some(other) => mismatched(key, "list", &other, default.to_vec()),
            None => default.to_vec(),
        }
    }
}

fn mismatched<T>(key: &str, expected: &str, found: &ConfigValue, default: T) -> T {
    log::warn!("Config: '{key}' should be a {expected}, found {found:?}; using default");
    default
}

/// An in-memory [`ConfigSource`].
#[derive(Debug, Clone, Default)]
pub struct MapConfigSource {
    values: HashMap<String, ConfigValue>,
}

impl MapConfigSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, builder style.
    pub fn with(mut self, key: &str, value: ConfigValue) -> Self {
        self.set(key, value);
        self
    }

    /// Sets `key` to `value`.
    pub fn set(&mut self, key: &str, value: ConfigValue) {
        self.values.insert(key.to_string(), value);
    }
}

impl ConfigSource for MapConfigSource {
    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.values.get(key).cloned()
    }
}

/// Errors reported by [`ThrottleConfig::validate`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A numeric value lies outside its allowed range.
    #[error("'{key}' is out of range: {value}")]
    OutOfRange {
        /// Offending field.
        key: &'static str,
        /// Offending value, formatted.
        value: String,
    },
    /// A value is structurally invalid.
    #[error("'{key}' is invalid: {reason}")]
    Invalid {
        /// Offending field.
        key: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Complete configuration for the throttling controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// When `false`, the pressure gate always answers "collect".
    pub maximize_memory_usage: bool,
    /// Thresholds used in normal mode.
    pub normal: ThresholdProfile,
    /// Thresholds used in elevated mode. Omitted limits keep their elevated
    /// defaults.
    #[serde(deserialize_with = "crate::profile::deserialize_elevated")]
    pub elevated: ThresholdProfile,
    /// Whether elevated mode can be entered at all.
    pub elevated_mode_enabled: bool,
    /// Case-insensitive scene name fragments that start an elevated period.
    pub elevated_scene_patterns: Vec<String>,
    /// Case-insensitive scene name fragments that override the patterns above.
    pub excluded_scene_patterns: Vec<String>,
    /// Force collection when an elevated period ends.
    pub collect_after_elevated: bool,
    /// Force a full collection after every scene unload.
    pub full_collect_on_scene_unload: bool,
    /// Spread coalesced collections across scheduling yields.
    pub incremental_collection: bool,
    /// Diagnostic switch: never unload resources.
    pub disable_unload: bool,
    /// Burst absorption window, in ticks.
    pub coalesce_ticks: u32,
    /// Coalescer tick period, in milliseconds.
    pub tick_interval_ms: u64,
    /// Pause between spread collection steps, in milliseconds.
    pub incremental_step_ms: u64,
    /// Bound on each finalizer wait, in milliseconds.
    pub finalizer_timeout_ms: u64,
    /// Enables the fixed-interval forced collection.
    pub periodic_collection_enabled: bool,
    /// Fixed-interval forced collection period, in seconds.
    pub periodic_collection_interval_secs: u64,
    /// Pressure monitor polling period while suppressed, in milliseconds.
    pub pressure_monitor_interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            maximize_memory_usage: true,
            normal: ThresholdProfile::normal(),
            elevated: ThresholdProfile::elevated(),
            elevated_mode_enabled: true,
            elevated_scene_patterns: vec!["dance".to_string()],
            excluded_scene_patterns: Vec::new(),
            collect_after_elevated: false,
            full_collect_on_scene_unload: false,
            incremental_collection: true,
            disable_unload: false,
            coalesce_ticks: 3,
            tick_interval_ms: 1000,
            incremental_step_ms: 16,
            finalizer_timeout_ms: 5000,
            periodic_collection_enabled: false,
            periodic_collection_interval_secs: 600,
            pressure_monitor_interval_ms: 5000,
        }
    }
}

impl ThrottleConfig {
    /// Builds a configuration from a key/value source, defaulting every
    /// missing key.
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let d = Self::default();
        Self {
            maximize_memory_usage: source
                .get_bool(keys::MAXIMIZE_MEMORY_USAGE, d.maximize_memory_usage),
            normal: ThresholdProfile {
                percent_load_max: source
                    .get_u64(keys::MEMORY_THRESHOLD, d.normal.percent_load_max as u64)
                    .min(u32::MAX as u64) as u32,
                page_file_free_ratio_min: source.get_f64(
                    keys::PAGE_FILE_FREE_THRESHOLD,
                    d.normal.page_file_free_ratio_min,
                ),
                min_available_page_file_bytes: source.get_u64(
                    keys::MIN_AVAIL_PAGE_FILE_BYTES,
                    d.normal.min_available_page_file_bytes,
                ),
                max_heap_bytes: source.get_u64(keys::MAX_HEAP_BYTES, d.normal.max_heap_bytes),
            },
            elevated: ThresholdProfile {
                percent_load_max: source
                    .get_u64(
                        keys::ELEVATED_MEMORY_THRESHOLD,
                        d.elevated.percent_load_max as u64,
                    )
                    .min(u32::MAX as u64) as u32,
                page_file_free_ratio_min: source.get_f64(
                    keys::ELEVATED_PAGE_FILE_FREE_THRESHOLD,
                    d.elevated.page_file_free_ratio_min,
                ),
                min_available_page_file_bytes: source.get_u64(
                    keys::ELEVATED_MIN_AVAIL_PAGE_FILE_BYTES,
                    d.elevated.min_available_page_file_bytes,
                ),
                max_heap_bytes: source
                    .get_u64(keys::ELEVATED_MAX_HEAP_BYTES, d.elevated.max_heap_bytes),
            },
            elevated_mode_enabled: source.get_bool(keys::ELEVATED_ENABLED, d.elevated_mode_enabled),
            elevated_scene_patterns: source
                .get_list(keys::ELEVATED_SCENE_PATTERNS, &d.elevated_scene_patterns),
            excluded_scene_patterns: source
                .get_list(keys::EXCLUDED_SCENE_PATTERNS, &d.excluded_scene_patterns),
            collect_after_elevated: source
                .get_bool(keys::COLLECT_AFTER_ELEVATED, d.collect_after_elevated),
            full_collect_on_scene_unload: source
                .get_bool(keys::COLLECT_ON_SCENE_UNLOAD, d.full_collect_on_scene_unload),
            incremental_collection: source
                .get_bool(keys::INCREMENTAL_COLLECTION, d.incremental_collection),
            disable_unload: source.get_bool(keys::DISABLE_UNLOAD, d.disable_unload),
            coalesce_ticks: source
                .get_u64(keys::COALESCE_TICKS, d.coalesce_ticks as u64)
                .min(u32::MAX as u64) as u32,
            tick_interval_ms: source.get_u64(keys::TICK_INTERVAL_MS, d.tick_interval_ms),
            incremental_step_ms: source.get_u64(keys::INCREMENTAL_STEP_MS, d.incremental_step_ms),
            finalizer_timeout_ms: source
                .get_u64(keys::FINALIZER_TIMEOUT_MS, d.finalizer_timeout_ms),
            periodic_collection_enabled: source
                .get_bool(keys::PERIODIC_ENABLED, d.periodic_collection_enabled),
            periodic_collection_interval_secs: source.get_u64(
                keys::PERIODIC_INTERVAL_SECS,
                d.periodic_collection_interval_secs,
            ),
            pressure_monitor_interval_ms: source
                .get_u64(keys::PRESSURE_MONITOR_MS, d.pressure_monitor_interval_ms),
        }
    }

    /// Checks every field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_profile(
            &self.normal,
            "normal.percent_load_max",
            "normal.page_file_free_ratio_min",
        )?;
        validate_profile(
            &self.elevated,
            "elevated.percent_load_max",
            "elevated.page_file_free_ratio_min",
        )?;

        if self.coalesce_ticks == 0 {
            return Err(ConfigError::OutOfRange {
                key: "coalesce_ticks",
                value: "0".to_string(),
            });
        }
        let intervals = [
            ("tick_interval_ms", self.tick_interval_ms),
            (
                "periodic_collection_interval_secs",
                self.periodic_collection_interval_secs,
            ),
            (
                "pressure_monitor_interval_ms",
                self.pressure_monitor_interval_ms,
            ),
        ];
        for (key, value) in intervals {
            if value == 0 {
                return Err(ConfigError::OutOfRange {
                    key,
                    value: value.to_string(),
                });
            }
        }
        if self
            .elevated_scene_patterns
            .iter()
            .any(|pattern| pattern.trim().is_empty())
        {
            return Err(ConfigError::Invalid {
                key: "elevated_scene_patterns",
                reason: "empty pattern would match every scene".to_string(),
            });
        }
        if self
            .excluded_scene_patterns
            .iter()
            .any(|pattern| pattern.trim().is_empty())
        {
            return Err(ConfigError::Invalid {
                key: "excluded_scene_patterns",
                reason: "empty pattern would exclude every scene".to_string(),
            });
        }
        Ok(())
    }

    /// Returns both threshold profiles.
    pub fn profiles(&self) -> ProfileSet {
        ProfileSet {
            normal: self.normal,
            elevated: self.elevated,
        }
    }

    /// Coalescer tick period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Pause between spread collection steps.
    pub fn incremental_step(&self) -> Duration {
        Duration::from_millis(self.incremental_step_ms)
    }

    /// Bound on each finalizer wait.
    pub fn finalizer_timeout(&self) -> Duration {
        Duration::from_millis(self.finalizer_timeout_ms)
    }

    /// Fixed-interval forced collection period.
    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_collection_interval_secs)
    }

    /// Pressure monitor polling period.
    pub fn pressure_monitor_interval(&self) -> Duration {
        Duration::from_millis(self.pressure_monitor_interval_ms)
    }
}

fn validate_profile(
    profile: &ThresholdProfile,
    load_key: &'static str,
    ratio_key: &'static str,
) -> Result<(), ConfigError> {
    if profile.percent_load_max > 100 {
        return Err(ConfigError::OutOfRange {
            key: load_key,
            value: profile.percent_load_max.to_string(),
        });
    }
    let ratio = profile.page_file_free_ratio_min;
    if !(0.0..=1.0).contains(&ratio) {
        return Err(ConfigError::OutOfRange {
            key: ratio_key,
            value: ratio.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::GIB;

    #[test]
    fn defaults_are_valid() {
        let config = ThrottleConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.coalesce_ticks, 3);
        assert_eq!(config.pressure_monitor_interval(), Duration::from_secs(5));
    }

    #[test]
    fn empty_source_yields_defaults() {
        let config = ThrottleConfig::from_source(&MapConfigSource::new());
        assert_eq!(config, ThrottleConfig::default());
    }

    #[test]
    fn source_overrides_selected_keys() {
        let source = MapConfigSource::new()
            .with(keys::MEMORY_THRESHOLD, ConfigValue::Int(60))
            .with(keys::ELEVATED_PAGE_FILE_FREE_THRESHOLD, ConfigValue::Float(0.2))
            .with(keys::ELEVATED_MIN_AVAIL_PAGE_FILE_BYTES, ConfigValue::Int(4 * GIB as i64))
            .with(
                keys::ELEVATED_SCENE_PATTERNS,
                ConfigValue::Text("dance, concert ,".to_string()),
            )
            .with(keys::PERIODIC_ENABLED, ConfigValue::Bool(true));

        let config = ThrottleConfig::from_source(&source);
        assert_eq!(config.normal.percent_load_max, 60);
        assert_eq!(config.elevated.page_file_free_ratio_min, 0.2);
        assert_eq!(config.elevated.min_available_page_file_bytes, 4 * GIB);
        assert_eq!(config.elevated_scene_patterns, vec!["dance", "concert"]);
        assert!(config.periodic_collection_enabled);
        // Untouched keys keep their defaults.
        assert_eq!(config.normal.page_file_free_ratio_min, 0.40);
    }

    #[test]
    fn mistyped_value_falls_back_to_default() {
        let source = MapConfigSource::new()
            .with(keys::MEMORY_THRESHOLD, ConfigValue::Text("high".to_string()))
            .with(keys::COALESCE_TICKS, ConfigValue::Int(-4));
        let config = ThrottleConfig::from_source(&source);
        assert_eq!(config.normal.percent_load_max, 75);
        assert_eq!(config.coalesce_ticks, 3);
    }

    #[test]
    fn integer_is_accepted_for_ratio() {
        let source =
            MapConfigSource::new().with(keys::PAGE_FILE_FREE_THRESHOLD, ConfigValue::Int(1));
        let config = ThrottleConfig::from_source(&source);
        assert_eq!(config.normal.page_file_free_ratio_min, 1.0);
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = ThrottleConfig::default();
        config.normal.percent_load_max = 101;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                key: "normal.percent_load_max",
                ..
            })
        ));

        let mut config = ThrottleConfig::default();
        config.elevated.page_file_free_ratio_min = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                key: "elevated.page_file_free_ratio_min",
                ..
            })
        ));

        let mut config = ThrottleConfig::default();
        config.coalesce_ticks = 0;
        assert!(config.validate().is_err());

        let mut config = ThrottleConfig::default();
        config.pressure_monitor_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_scene_pattern() {
        let config = ThrottleConfig {
            elevated_scene_patterns: vec!["  ".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn partial_elevated_profile_merges_onto_elevated_defaults() {
        let config: ThrottleConfig =
            serde_json::from_str(r#"{"elevated": {"max_heap_bytes": 1024}}"#)
                .expect("document should parse");

        assert_eq!(config.elevated.max_heap_bytes, 1024);
        assert_eq!(
            config.elevated.percent_load_max,
            ThresholdProfile::elevated().percent_load_max
        );
        assert_eq!(config.normal, ThresholdProfile::normal());
    }

    #[test]
    fn validate_rejects_blank_excluded_pattern() {
        let config = ThrottleConfig {
            excluded_scene_patterns: vec!["menu".to_string(), String::new()],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "excluded_scene_patterns",
                ..
            })
        ));
    }
}
