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

//! The memory pressure gate.
//!
//! Answers one question: is there so much memory headroom that an expensive
//! collection can be skipped? Every comparison is strict, so a value sitting
//! exactly on its threshold counts as a breach.

use reclaim_core::{
    DecisionOutcome, DecisionReason, MemorySampler, MemorySnapshot, Mode, ThresholdProfile,
    ThrottleEvent,
};

use crate::events::EventSink;

/// The outcome of a pressure evaluation together with its cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Skip or collect.
    pub outcome: DecisionOutcome,
    /// First breached limit, or why no limit was checked.
    pub reason: DecisionReason,
}

impl Verdict {
    const fn collect(reason: DecisionReason) -> Self {
        Self {
            outcome: DecisionOutcome::Collect,
            reason,
        }
    }

    /// Returns `true` if memory is plentiful and the operation may be skipped.
    pub fn is_plenty(&self) -> bool {
        self.outcome == DecisionOutcome::Skip
    }
}

/// Checks `snapshot` against all four limits of `profile`.
pub fn evaluate(profile: &ThresholdProfile, snapshot: &MemorySnapshot) -> Verdict {
    if snapshot.percent_physical_load >= profile.percent_load_max {
        return Verdict::collect(DecisionReason::PhysicalLoad);
    }
    if snapshot.page_file_free_ratio() <= profile.page_file_free_ratio_min {
        return Verdict::collect(DecisionReason::PageFileRatio);
    }
    if snapshot.page_file_available_bytes <= profile.min_available_page_file_bytes {
        return Verdict::collect(DecisionReason::PageFileAvailable);
    }
    if snapshot.managed_heap_bytes >= profile.max_heap_bytes {
        return Verdict::collect(DecisionReason::ManagedHeap);
    }
    Verdict {
        outcome: DecisionOutcome::Skip,
        reason: DecisionReason::WithinThresholds,
    }
}

/// Applies the global throttling toggle and the active profile to fresh
/// telemetry.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    maximize_memory_usage: bool,
    events: EventSink,
}

impl DecisionEngine {
    /// Creates an engine. With `maximize_memory_usage == false` every gated
    /// decision answers "collect".
    pub fn new(maximize_memory_usage: bool, events: EventSink) -> Self {
        Self {
            maximize_memory_usage,
            events,
        }
    }

    /// Returns whether throttling is enabled.
    pub fn maximize_memory_usage(&self) -> bool {
        self.maximize_memory_usage
    }

    /// Decides on an already taken snapshot. `None` means telemetry was
    /// unavailable, which always answers "collect".
    pub fn decide(
        &self,
        mode: Mode,
        profile: &ThresholdProfile,
        snapshot: Option<&MemorySnapshot>,
        ignore_global_toggle: bool,
    ) -> Verdict {
        let verdict = if !self.maximize_memory_usage && !ignore_global_toggle {
            Verdict::collect(DecisionReason::ThrottlingDisabled)
        } else {
            match snapshot {
                Some(snapshot) => evaluate(profile, snapshot),
                None => Verdict::collect(DecisionReason::TelemetryUnavailable),
            }
        };
        self.report(mode, profile, snapshot, verdict);
        verdict
    }

    /// Samples memory and decides. Returns `true` if the expensive operation
    /// can be skipped.
    ///
    /// The sampler is not consulted when the global toggle already forces a
    /// collection.
    pub fn plenty_of_memory(
        &self,
        mode: Mode,
        profile: &ThresholdProfile,
        sampler: &dyn MemorySampler,
        ignore_global_toggle: bool,
    ) -> bool {
        if !self.maximize_memory_usage && !ignore_global_toggle {
            return self
                .decide(mode, profile, None, ignore_global_toggle)
                .is_plenty();
        }
        let snapshot = match sampler.sample() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("DecisionEngine: {e}; assuming memory pressure");
                None
            }
        };
        self.decide(mode, profile, snapshot.as_ref(), ignore_global_toggle)
            .is_plenty()
    }

    fn report(
        &self,
        mode: Mode,
        profile: &ThresholdProfile,
        snapshot: Option<&MemorySnapshot>,
        verdict: Verdict,
    ) {
        match snapshot {
            Some(s) => log::debug!(
                "DecisionEngine: {:?} ({:?}, {:?}) load={}%/<{}% page_file_free={:.2}/>{:.2} \
                 page_file_avail={}MiB/>{}MiB heap={}MiB/<{}MiB",
                verdict.outcome,
                verdict.reason,
                mode,
                s.percent_physical_load,
                profile.percent_load_max,
                s.page_file_free_ratio(),
                profile.page_file_free_ratio_min,
                s.page_file_available_mib(),
                profile.min_available_page_file_bytes / reclaim_core::MIB,
                s.managed_heap_mib(),
                profile.max_heap_bytes / reclaim_core::MIB,
            ),
            None => log::debug!(
                "DecisionEngine: {:?} ({:?}, {:?})",
                verdict.outcome,
                verdict.reason,
                mode
            ),
        }

        self.events.emit(ThrottleEvent::Decision {
            mode,
            outcome: verdict.outcome,
            reason: verdict.reason,
            snapshot: snapshot.copied(),
            profile: *profile,
        });
    }
}
