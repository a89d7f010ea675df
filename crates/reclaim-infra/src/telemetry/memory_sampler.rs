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


//! `sysinfo`-based implementation of the [`MemorySampler`] trait.
//!
//! The page file is modelled as the commit charge: physical memory plus swap.

use std::sync::Mutex;

use reclaim_core::{MemorySampler, MemorySnapshot, SampleError};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// A memory sampler that uses the `sysinfo` crate.
pub struct SysinfoSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoSampler {
    /// Creates a sampler reporting the current process' resident memory as
    /// the managed heap.
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                log::warn!("SysinfoSampler: current process unknown ({e}), heap reported as 0");
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }

    /// Creates a sampler that always reports a managed heap of 0.
    pub fn without_heap() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: None,
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn sample(&self) -> Result<MemorySnapshot, SampleError> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| SampleError::Unavailable("sampler state poisoned".to_string()))?;

        system.refresh_memory();
        let heap = match self.pid {
            Some(pid) => {
                system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::nothing().with_memory(),
                );
                system.process(pid).map_or(0, |process| process.memory())
            }
            None => 0,
        };

        snapshot_from(
            RawMemory {
                total: system.total_memory(),
                available: system.available_memory(),
                total_swap: system.total_swap(),
                free_swap: system.free_swap(),
            },
            heap,
        )
    }
}

/// Byte counts as reported by the OS.
#[derive(Debug, Clone, Copy)]
struct RawMemory {
    total: u64,
    available: u64,
    total_swap: u64,
    free_swap: u64,
}

fn snapshot_from(raw: RawMemory, heap: u64) -> Result<MemorySnapshot, SampleError> {
    if raw.total == 0 {
        return Err(SampleError::Unavailable(
            "total physical memory reported as 0".to_string(),
        ));
    }
    let available = raw.available.min(raw.total);
    let used = raw.total - available;
    let percent = (u128::from(used) * 100 / u128::from(raw.total)) as u32;

    Ok(MemorySnapshot {
        percent_physical_load: percent,
        page_file_total_bytes: raw.total.saturating_add(raw.total_swap),
        page_file_available_bytes: available.saturating_add(raw.free_swap.min(raw.total_swap)),
        managed_heap_bytes: heap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reclaim_core::GIB;

    #[test]
    fn load_and_commit_charge_are_derived_from_raw_counts() {
        let raw = RawMemory {
            total: 16 * GIB,
            available: 4 * GIB,
            total_swap: 8 * GIB,
            free_swap: 6 * GIB,
        };
        let snapshot = snapshot_from(raw, 512).expect("memory reported");

        assert_eq!(snapshot.percent_physical_load, 75);
        assert_eq!(snapshot.page_file_total_bytes, 24 * GIB);
        assert_eq!(snapshot.page_file_available_bytes, 10 * GIB);
        assert_eq!(snapshot.managed_heap_bytes, 512);
    }

    #[test]
    fn zero_total_memory_is_unavailable() {
        let raw = RawMemory {
            total: 0,
            available: 0,
            total_swap: 0,
            free_swap: 0,
        };
        assert!(matches!(
            snapshot_from(raw, 0),
            Err(SampleError::Unavailable(_))
        ));
    }

    #[test]
    fn inconsistent_counts_are_clamped() {
        let raw = RawMemory {
            total: 8 * GIB,
            available: 9 * GIB,
            total_swap: 0,
            free_swap: GIB,
        };
        let snapshot = snapshot_from(raw, 0).expect("memory reported");
        assert_eq!(snapshot.percent_physical_load, 0);
        assert_eq!(snapshot.page_file_available_bytes, 8 * GIB);
    }

    #[test]
    fn live_sample_is_within_bounds() {
        let sampler = SysinfoSampler::new();
        if let Ok(snapshot) = sampler.sample() {
            assert!(snapshot.percent_physical_load <= 100);
            assert!(snapshot.page_file_available_bytes <= snapshot.page_file_total_bytes);
        }
    }

    #[test]
    fn without_heap_reports_zero() {
        let sampler = SysinfoSampler::without_heap();
        if let Ok(snapshot) = sampler.sample() {
            assert_eq!(snapshot.managed_heap_bytes, 0);
        }
    }
}
