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

//! # Reclaim Control
//!
//! The throttling core. Decides *when* a full collection or an unused
//! resource unload actually executes, instead of executing one every time the
//! host asks.
//!
//! - [`DecisionEngine`]: snapshot + active profile → skip or collect.
//! - [`RequestCoalescer`]: folds bursts of collection requests into one
//!   delayed decision.
//! - [`UnloadSerializer`]: at most one unload in flight.
//! - [`CollectionRunner`]: the monolithic and spread collection strategies.
//! - [`ModeController`]: Normal/Elevated state machine and automatic
//!   collector suppression.
//! - [`ThrottleController`]: owns all of the above, runs the background
//!   tasks (coalescer ticks, periodic collection, pressure monitor) and is
//!   the single entry point for the host integration layer.

pub mod coalescer;
pub mod collection;
pub mod decision;
pub mod events;
pub mod mode;
pub mod service;
pub mod stats;
pub mod unload;
mod valve;

pub use coalescer::RequestCoalescer;
pub use collection::{CollectionRunner, SpreadCollection};
pub use decision::{evaluate, DecisionEngine, Verdict};
pub use events::EventSink;
pub use mode::{ModeChange, ModeController, SceneClass};
pub use service::{HostBindings, ThrottleController};
pub use stats::{StatsSnapshot, ThrottleStats};
pub use unload::{UnloadAction, UnloadSerializer};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
