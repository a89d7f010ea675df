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


//! A simulated host runtime whose memory load reacts to collections.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reclaim_control::HostBindings;
use reclaim_core::{
    AutomaticCollectorControl, CollectScope, HookError, ManagedCollector, MemorySampler,
    MemorySnapshot, ResourceUnloader, SampleError, UnloadHandleRef, UnloadOperation, GIB, MIB,
};

const SETTLED_LOAD: u32 = 55;
const UNLOAD_DURATION: Duration = Duration::from_millis(300);

#[derive(Debug)]
struct TimedUnload {
    deadline: Instant,
}

impl UnloadOperation for TimedUnload {
    fn is_done(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Memory load in percent plus a managed heap, both shrunk by collections.
#[derive(Debug)]
pub struct SimulatedHost {
    load: AtomicU32,
    heap_mib: AtomicU64,
    automatic_collection: AtomicBool,
    collections: AtomicU64,
}

impl SimulatedHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            load: AtomicU32::new(50),
            heap_mib: AtomicU64::new(2048),
            automatic_collection: AtomicBool::new(true),
            collections: AtomicU64::new(0),
        })
    }

    /// Raises the physical load by `percent`, saturating at 100.
    pub fn allocate(&self, percent: u32) {
        let load = (self.load.load(Ordering::SeqCst) + percent).min(100);
        self.load.store(load, Ordering::SeqCst);
        self.heap_mib.fetch_add(u64::from(percent) * 64, Ordering::SeqCst);
        log::info!("Host: memory load now {load}%");
    }

    pub fn collections(&self) -> u64 {
        self.collections.load(Ordering::SeqCst)
    }

    pub fn bindings(self: &Arc<Self>) -> HostBindings {
        HostBindings {
            sampler: self.clone(),
            collector: self.clone(),
            unloader: self.clone(),
            auto_control: Some(self.clone()),
        }
    }
}

impl MemorySampler for SimulatedHost {
    fn sample(&self) -> Result<MemorySnapshot, SampleError> {
        Ok(MemorySnapshot {
            percent_physical_load: self.load.load(Ordering::SeqCst),
            page_file_total_bytes: 32 * GIB,
            page_file_available_bytes: 16 * GIB,
            managed_heap_bytes: self.heap_mib.load(Ordering::SeqCst) * MIB,
        })
    }
}

impl ManagedCollector for SimulatedHost {
    fn collect(&self, scope: CollectScope) {
        self.collections.fetch_add(1, Ordering::SeqCst);
        let load = self.load.load(Ordering::SeqCst);
        let settled = match scope {
            CollectScope::Full => SETTLED_LOAD,
            CollectScope::Generation(_) => load.saturating_sub(5).max(SETTLED_LOAD),
        };
        self.load.store(settled, Ordering::SeqCst);
        self.heap_mib.store(
            self.heap_mib.load(Ordering::SeqCst) / 2,
            Ordering::SeqCst,
        );
        log::info!("Host: collected {scope:?}, load {load}% -> {settled}%");
    }

    fn wait_for_pending_finalizers(&self, _timeout: Duration) -> bool {
        true
    }

    fn max_generation(&self) -> u32 {
        2
    }
}

impl ResourceUnloader for SimulatedHost {
    fn unload_unused(&self) -> UnloadHandleRef {
        log::info!("Host: unloading unused resources");
        Arc::new(TimedUnload {
            deadline: Instant::now() + UNLOAD_DURATION,
        })
    }
}

impl AutomaticCollectorControl for SimulatedHost {
    fn initialize(&self) -> Result<(), HookError> {
        Ok(())
    }

    fn set_automatic_collection(&self, enabled: bool) -> bool {
        self.automatic_collection.store(enabled, Ordering::SeqCst);
        log::info!("Host: automatic collection enabled={enabled}");
        true
    }
}
