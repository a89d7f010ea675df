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

//! # Reclaim Core
//!
//! Foundational crate containing the memory model, the host primitive traits,
//! and the configuration contracts shared by the collection throttling
//! controller.
//!
//! This crate defines the abstract "what": the snapshot a sampler produces,
//! the threshold profiles a decision is made against, and the primitives a
//! host runtime must expose (collect, wait for finalizers, unload, toggle the
//! automatic collector). `reclaim-control` provides the decision logic on top
//! of these contracts and `reclaim-infra` provides concrete implementations.

#![warn(missing_docs)]

pub mod config;
pub mod event;
pub mod host;
pub mod memory;
pub mod profile;

pub use config::{ConfigError, ConfigSource, ConfigValue, MapConfigSource, ThrottleConfig};
pub use event::{
    CollectionKind, DecisionOutcome, DecisionReason, ThrottleEvent, TransitionTrigger,
};
pub use host::{
    AutomaticCollectorControl, CollectScope, CollectionHook, HookError, HostInterceptor,
    ManagedCollector, ResourceUnloader, UnloadHandleRef, UnloadHook, UnloadOperation,
};
pub use memory::{MemorySampler, MemorySnapshot, SampleError, GIB, MIB};
pub use profile::{Mode, ProfileSet, ThresholdProfile};
