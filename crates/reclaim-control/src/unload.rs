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

//! Single-flight guard around the host's unused-resource unload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use reclaim_core::{ResourceUnloader, UnloadHandleRef};

use crate::lock;

/// What a call to [`UnloadSerializer::request_unload`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadAction {
    /// The diagnostic switch is on; nothing happened.
    Disabled,
    /// A new host unload was started.
    Started,
    /// The existing handle was returned unchanged.
    Reused,
}

/// Owns the single live [`UnloadHandleRef`].
///
/// A new host unload only starts when none was ever started, or when the last
/// one has finished and memory pressure still calls for another sweep.
/// Everyone else gets the current handle back, so repeated requests while one
/// is pending cost nothing.
pub struct UnloadSerializer {
    unloader: Arc<dyn ResourceUnloader>,
    current: Mutex<Option<UnloadHandleRef>>,
    disabled: AtomicBool,
}

impl UnloadSerializer {
    /// Wraps the host's original unload primitive.
    pub fn new(unloader: Arc<dyn ResourceUnloader>, disabled: bool) -> Self {
        Self {
            unloader,
            current: Mutex::new(None),
            disabled: AtomicBool::new(disabled),
        }
    }

    /// Turns the diagnostic "never unload" switch on or off.
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    /// Returns whether unloading is disabled.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Returns whether the tracked unload is still running.
    pub fn in_flight(&self) -> bool {
        lock(&self.current)
            .as_ref()
            .is_some_and(|handle| !handle.is_done())
    }

    /// Handles one intercepted unload request.
    ///
    /// `plenty_of_memory` is only evaluated when the previous unload has
    /// finished; returning `true` from it keeps the finished handle.
    pub fn request_unload(
        &self,
        plenty_of_memory: impl FnOnce() -> bool,
    ) -> (Option<UnloadHandleRef>, UnloadAction) {
        if self.is_disabled() {
            log::debug!("UnloadSerializer: unloading disabled, request ignored");
            return (None, UnloadAction::Disabled);
        }

        let mut current = lock(&self.current);
        let start = match current.as_ref() {
            None => true,
            Some(handle) => handle.is_done() && !plenty_of_memory(),
        };

        if start {
            log::debug!("UnloadSerializer: starting unused resource unload");
            *current = Some(self.unloader.unload_unused());
            (current.clone(), UnloadAction::Started)
        } else {
            (current.clone(), UnloadAction::Reused)
        }
    }
}

impl std::fmt::Debug for UnloadSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnloadSerializer")
            .field("current", &*lock(&self.current))
            .field("disabled", &self.is_disabled())
            .finish_non_exhaustive()
    }
}
