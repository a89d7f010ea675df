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

//! Structured events emitted by the controller for observability.

use serde::Serialize;

use crate::memory::MemorySnapshot;
use crate::profile::{Mode, ThresholdProfile};

/// What a pressure decision concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// Memory is plentiful, the expensive operation is skipped.
    Skip,
    /// The expensive operation should run.
    Collect,
}

/// Why a pressure decision came out the way it did.
///
/// For [`DecisionOutcome::Collect`] the reason names the first breached limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Every measured value is within the active profile.
    WithinThresholds,
    /// The user turned throttling off.
    ThrottlingDisabled,
    /// The sampler could not read memory statistics.
    TelemetryUnavailable,
    /// Physical load reached `percent_load_max`.
    PhysicalLoad,
    /// Free page file ratio fell to `page_file_free_ratio_min`.
    PageFileRatio,
    /// Available page file fell to `min_available_page_file_bytes`.
    PageFileAvailable,
    /// Managed heap reached `max_heap_bytes`.
    ManagedHeap,
}

/// What caused a mode transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionTrigger {
    /// A scene was entered.
    SceneEnter(String),
    /// A scene was exited.
    SceneExit(String),
    /// A cooperating feature announced the start of an elevated period.
    ExternalStart,
    /// A cooperating feature announced the end of an elevated period.
    ExternalEnd,
}

/// The strategy an executed collection used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// One monolithic full collection.
    Full,
    /// Generation-by-generation collection spread across scheduling yields.
    Spread,
}

/// A structured controller event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ThrottleEvent {
    /// A pressure decision was evaluated.
    Decision {
        /// Mode whose profile was evaluated.
        mode: Mode,
        /// Outcome of the decision.
        outcome: DecisionOutcome,
        /// Reason for the outcome.
        reason: DecisionReason,
        /// The measured values, if the sampler produced any.
        snapshot: Option<MemorySnapshot>,
        /// The limits the snapshot was checked against.
        profile: ThresholdProfile,
    },
    /// The controller switched modes.
    ModeTransition {
        /// Mode before the transition.
        from: Mode,
        /// Mode after the transition.
        to: Mode,
        /// What caused it.
        trigger: TransitionTrigger,
        /// Whether the automatic collector is suppressed afterwards.
        suppressed: bool,
    },
    /// A collection finished.
    CollectionCompleted {
        /// Strategy used.
        kind: CollectionKind,
        /// `true` if the pressure gate was bypassed.
        forced: bool,
        /// Wall-clock duration in milliseconds.
        elapsed_ms: u64,
    },
    /// A host unload sweep was started.
    UnloadStarted,
    /// The pressure monitor forced a collection during suppression.
    PressureReleased {
        /// The snapshot that breached the elevated profile, if any.
        snapshot: Option<MemorySnapshot>,
    },
    /// An optional capability is unavailable and the controller degraded.
    Degraded {
        /// Human-readable reason.
        reason: String,
    },
}
