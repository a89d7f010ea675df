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

//! Lock-free counters describing what the controller has done so far.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters, updated by the controller and readable from any thread.
#[derive(Debug, Default)]
pub struct ThrottleStats {
    requests_absorbed: AtomicU64,
    coalesced_fires: AtomicU64,
    collections_run: AtomicU64,
    collections_skipped: AtomicU64,
    unloads_started: AtomicU64,
    unloads_reused: AtomicU64,
    pressure_releases: AtomicU64,
    mode_transitions: AtomicU64,
}

/// A plain copy of [`ThrottleStats`] at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Native collection requests intercepted and absorbed.
    pub requests_absorbed: u64,
    /// Times the coalescing countdown reached zero.
    pub coalesced_fires: u64,
    /// Collections actually executed, forced or gated.
    pub collections_run: u64,
    /// Collections skipped because memory was plentiful.
    pub collections_skipped: u64,
    /// Host unload sweeps started.
    pub unloads_started: u64,
    /// Unload requests answered with the existing handle.
    pub unloads_reused: u64,
    /// Forced collections made by the pressure monitor.
    pub pressure_releases: u64,
    /// Normal/Elevated mode switches.
    pub mode_transitions: u64,
}

impl ThrottleStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request(&self) {
        self.requests_absorbed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fire(&self) {
        self.coalesced_fires.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_collection(&self) {
        self.collections_run.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skip(&self) {
        self.collections_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unload_started(&self) {
        self.unloads_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unload_reused(&self) {
        self.unloads_reused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pressure_release(&self) {
        self.pressure_releases.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transition(&self) {
        self.mode_transitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_absorbed: self.requests_absorbed.load(Ordering::Relaxed),
            coalesced_fires: self.coalesced_fires.load(Ordering::Relaxed),
            collections_run: self.collections_run.load(Ordering::Relaxed),
            collections_skipped: self.collections_skipped.load(Ordering::Relaxed),
            unloads_started: self.unloads_started.load(Ordering::Relaxed),
            unloads_reused: self.unloads_reused.load(Ordering::Relaxed),
            pressure_releases: self.pressure_releases.load(Ordering::Relaxed),
            mode_transitions: self.mode_transitions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        assert_eq!(ThrottleStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn snapshot_reflects_recorded_events() {
        let stats = ThrottleStats::new();
        stats.record_request();
        stats.record_request();
        stats.record_fire();
        stats.record_skip();
        stats.record_unload_reused();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests_absorbed, 2);
        assert_eq!(snapshot.coalesced_fires, 1);
        assert_eq!(snapshot.collections_skipped, 1);
        assert_eq!(snapshot.unloads_reused, 1);
        assert_eq!(snapshot.collections_run, 0);
    }
}
