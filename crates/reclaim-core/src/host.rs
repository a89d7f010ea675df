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

//! Host runtime primitives consumed by the controller.
//!
//! The controller never implements collection or unloading itself. The host
//! integration layer provides these traits, typically by wrapping the
//! runtime's native entry points behind whatever hooking mechanism the
//! platform offers.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// How much of the managed heap a native collection should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CollectScope {
    /// Collect generations `0..=n` only.
    Generation(u32),
    /// Collect every generation.
    Full,
}

/// The host's native collector.
pub trait ManagedCollector: Send + Sync {
    /// Runs a native collection over the given scope.
    fn collect(&self, scope: CollectScope);

    /// Blocks until pending finalizers have run or `timeout` elapses.
    ///
    /// Returns `true` if the finalizer queue drained in time.
    fn wait_for_pending_finalizers(&self, timeout: Duration) -> bool;

    /// Returns the oldest generation the collector exposes.
    ///
    /// `0` means the collector offers no generational control, which disables
    /// the spread collection strategy.
    fn max_generation(&self) -> u32 {
        0
    }
}

/// Errors raised while taking control of the automatic collector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    /// The native hook could not be installed.
    #[error("automatic collector hook failed to initialize: {0}")]
    InitFailed(String),
    /// The host runtime has no automatic collector toggle at all.
    #[error("automatic collector control is not supported by this host")]
    Unsupported,
}

/// Optional control over the host's automatic (background) collector.
pub trait AutomaticCollectorControl: Send + Sync {
    /// Installs the native hook. Called lazily before the first suppression
    /// and retried on later attempts if it fails.
    fn initialize(&self) -> Result<(), HookError>;

    /// Enables or disables automatic collection. Returns `true` on success.
    fn set_automatic_collection(&self, enabled: bool) -> bool;
}

/// An in-flight host unload operation.
pub trait UnloadOperation: Send + Sync + Debug {
    /// Returns `true` once the host reports the unload as finished.
    fn is_done(&self) -> bool;
}

/// Shared reference to an in-flight unload, handed back to host callers.
pub type UnloadHandleRef = Arc<dyn UnloadOperation>;

/// The host's original "unload unused resources" primitive.
pub trait ResourceUnloader: Send + Sync {
    /// Starts a host unload sweep and returns its handle.
    fn unload_unused(&self) -> UnloadHandleRef;
}

/// Callback invoked in place of a native "collect now" call.
pub type CollectionHook = Box<dyn Fn() + Send + Sync>;

/// Callback invoked in place of a native "unload unused resources" call.
///
/// `None` tells the host that no unload happened.
pub type UnloadHook = Box<dyn Fn() -> Option<UnloadHandleRef> + Send + Sync>;

/// Redirects the host's native requests into the controller.
pub trait HostInterceptor {
    /// Routes every native "collect now" call to `on_request` instead of
    /// executing it.
    fn intercept_collection_requests(&self, on_request: CollectionHook);

    /// Routes every native "unload unused resources" call to `on_request`.
    fn intercept_unload_requests(&self, on_request: UnloadHook);
}
