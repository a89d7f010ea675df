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

//! Memory telemetry contract.
//!
//! A [`MemorySampler`] actively polls the operating system (and optionally the
//! host runtime) for a [`MemorySnapshot`]. Snapshots are taken fresh for every
//! decision and are never cached beyond it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One mebibyte, in bytes.
pub const MIB: u64 = 1024 * 1024;

/// One gibibyte, in bytes.
pub const GIB: u64 = 1024 * MIB;

/// A point-in-time view of system and process memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Physical memory load, from 0 to 100.
    pub percent_physical_load: u32,
    /// Total size of the page file (commit limit), in bytes.
    pub page_file_total_bytes: u64,
    /// Available bytes in the page file.
    pub page_file_available_bytes: u64,
    /// Bytes held by the managed heap, or 0 if the host cannot report it.
    pub managed_heap_bytes: u64,
}

impl MemorySnapshot {
    /// Returns the free fraction of the page file, in `0.0..=1.0`.
    ///
    /// An empty page file reports a ratio of `0.0`.
    pub fn page_file_free_ratio(&self) -> f64 {
        if self.page_file_total_bytes == 0 {
            return 0.0;
        }
        self.page_file_available_bytes as f64 / self.page_file_total_bytes as f64
    }

    /// Returns the available page file in mebibytes.
    pub fn page_file_available_mib(&self) -> u64 {
        self.page_file_available_bytes / MIB
    }

    /// Returns the managed heap size in mebibytes.
    pub fn managed_heap_mib(&self) -> u64 {
        self.managed_heap_bytes / MIB
    }
}

/// Errors returned by a [`MemorySampler`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleError {
    /// The OS memory statistics could not be read.
    #[error("memory statistics unavailable: {0}")]
    Unavailable(String),
}

/// Reads current memory statistics on demand.
///
/// Implementations must have no side effects and must never trigger a
/// collection themselves. Callers treat an error as "not enough information
/// to skip", so a failing sampler makes the controller collect.
pub trait MemorySampler: Send + Sync {
    /// Takes a fresh snapshot.
    fn sample(&self) -> Result<MemorySnapshot, SampleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_file_ratio_is_available_over_total() {
        let snapshot = MemorySnapshot {
            percent_physical_load: 50,
            page_file_total_bytes: 8 * GIB,
            page_file_available_bytes: 2 * GIB,
            managed_heap_bytes: 0,
        };
        assert!((snapshot.page_file_free_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_page_file_has_zero_ratio() {
        let snapshot = MemorySnapshot::default();
        assert_eq!(snapshot.page_file_free_ratio(), 0.0);
    }

    #[test]
    fn mib_helpers_truncate() {
        let snapshot = MemorySnapshot {
            page_file_available_bytes: 3 * MIB + 17,
            managed_heap_bytes: GIB,
            ..Default::default()
        };
        assert_eq!(snapshot.page_file_available_mib(), 3);
        assert_eq!(snapshot.managed_heap_mib(), 1024);
    }

    #[test]
    fn unavailable_error_message() {
        let err = SampleError::Unavailable("no /proc/meminfo".to_string());
        assert_eq!(
            err.to_string(),
            "memory statistics unavailable: no /proc/meminfo"
        );
    }
}
