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

//! Threshold profiles and the controller mode that selects between them.

use serde::{Deserialize, Deserializer, Serialize};

use crate::memory::{GIB, MIB};

/// The operating mode of the controller.
///
/// The mode decides which [`ThresholdProfile`] is active and whether the
/// host's automatic collector is held suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mode {
    /// Regular gameplay and loading. Strict thresholds, automatic collector running.
    #[default]
    Normal,
    /// A latency-sensitive period. Relaxed thresholds, automatic collector suppressed.
    Elevated,
}

/// A named bundle of the four limits a snapshot is checked against.
///
/// A snapshot only counts as "plenty of memory" when every measured value is
/// strictly on the safe side of its limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdProfile {
    /// Physical load must stay strictly below this percentage.
    pub percent_load_max: u32,
    /// The free page file ratio must stay strictly above this value (0..=1).
    pub page_file_free_ratio_min: f64,
    /// The available page file must stay strictly above this many bytes.
    pub min_available_page_file_bytes: u64,
    /// The managed heap must stay strictly below this many bytes.
    pub max_heap_bytes: u64,
}

impl ThresholdProfile {
    /// The default profile used outside of elevated periods.
    pub const fn normal() -> Self {
        Self {
            percent_load_max: 75,
            page_file_free_ratio_min: 0.40,
            min_available_page_file_bytes: 2 * GIB,
            max_heap_bytes: 20_000 * MIB,
        }
    }

    /// The relaxed profile used while latency matters more than footprint.
    pub const fn elevated() -> Self {
        Self {
            percent_load_max: 90,
            page_file_free_ratio_min: 0.10,
            min_available_page_file_bytes: 2 * GIB,
            max_heap_bytes: 20_000 * MIB,
        }
    }
}

impl Default for ThresholdProfile {
    fn default() -> Self {
        Self::normal()
    }
}

/// A profile block where every limit is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialProfile {
    percent_load_max: Option<u32>,
    page_file_free_ratio_min: Option<f64>,
    min_available_page_file_bytes: Option<u64>,
    max_heap_bytes: Option<u64>,
}

impl PartialProfile {
    fn over(self, base: ThresholdProfile) -> ThresholdProfile {
        ThresholdProfile {
            percent_load_max: self.percent_load_max.unwrap_or(base.percent_load_max),
            page_file_free_ratio_min: self
                .page_file_free_ratio_min
                .unwrap_or(base.page_file_free_ratio_min),
            min_available_page_file_bytes: self
                .min_available_page_file_bytes
                .unwrap_or(base.min_available_page_file_bytes),
            max_heap_bytes: self.max_heap_bytes.unwrap_or(base.max_heap_bytes),
        }
    }
}

/// Reads an elevated profile block, taking omitted limits from
/// [`ThresholdProfile::elevated`].
pub(crate) fn deserialize_elevated<'de, D>(deserializer: D) -> Result<ThresholdProfile, D::Error>
where
    D: Deserializer<'de>,
{
    PartialProfile::deserialize(deserializer)
        .map(|partial| partial.over(ThresholdProfile::elevated()))
}

/// The two process-wide profiles, fixed once configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileSet {
    /// Profile active in [`Mode::Normal`].
    pub normal: ThresholdProfile,
    /// Profile active in [`Mode::Elevated`].
    pub elevated: ThresholdProfile,
}

impl ProfileSet {
    /// Returns the profile governing the given mode.
    pub fn for_mode(&self, mode: Mode) -> &ThresholdProfile {
        match mode {
            Mode::Normal => &self.normal,
            Mode::Elevated => &self.elevated,
        }
    }
}

impl Default for ProfileSet {
    fn default() -> Self {
        Self {
            normal: ThresholdProfile::normal(),
            elevated: ThresholdProfile::elevated(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevated_is_more_tolerant_than_normal() {
        let normal = ThresholdProfile::normal();
        let elevated = ThresholdProfile::elevated();
        assert!(elevated.percent_load_max > normal.percent_load_max);
        assert!(elevated.page_file_free_ratio_min < normal.page_file_free_ratio_min);
        assert_eq!(
            elevated.min_available_page_file_bytes,
            normal.min_available_page_file_bytes
        );
    }

    #[test]
    fn profile_set_selects_by_mode() {
        let set = ProfileSet::default();
        assert_eq!(set.for_mode(Mode::Normal).percent_load_max, 75);
        assert_eq!(set.for_mode(Mode::Elevated).percent_load_max, 90);
    }
}
