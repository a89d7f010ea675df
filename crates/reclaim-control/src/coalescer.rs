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

//! Burst absorption for collection requests.
//!
//! Every intercepted request resets a countdown to the absorption window.
//! Each scheduling tick decrements it, and the gated collection fires exactly
//! once when it reaches zero. A request arriving mid-countdown only extends
//! the window, so a burst collapses into a single collection timed from its
//! last request.

use std::sync::Mutex;

use tokio::sync::Notify;

use crate::lock;

/// Countdown state shared between the host's request path and the tick loop.
#[derive(Debug)]
pub struct RequestCoalescer {
    window: u32,
    remaining: Mutex<u32>,
    wake: Notify,
}

impl RequestCoalescer {
    /// Creates an idle coalescer absorbing bursts for `window` ticks.
    ///
    /// A zero window is raised to one tick.
    pub fn new(window: u32) -> Self {
        Self {
            window: window.max(1),
            remaining: Mutex::new(0),
            wake: Notify::new(),
        }
    }

    /// The absorption window, in ticks.
    pub fn window(&self) -> u32 {
        self.window
    }

    /// Records an incoming request, restarting the countdown.
    pub fn request(&self) {
        *lock(&self.remaining) = self.window;
        self.wake.notify_one();
    }

    /// Advances the countdown by one tick.
    ///
    /// Returns `true` on the tick where the countdown reaches zero; the caller
    /// must then run the gated collection once.
    pub fn tick(&self) -> bool {
        let mut remaining = lock(&self.remaining);
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        log::trace!("RequestCoalescer: {} tick(s) left", *remaining);
        *remaining == 0
    }

    /// Ticks left before the pending collection fires, or 0 when idle.
    pub fn pending_ticks(&self) -> u32 {
        *lock(&self.remaining)
    }

    /// Returns `true` when no collection is pending.
    pub fn is_idle(&self) -> bool {
        self.pending_ticks() == 0
    }

    /// Suspends until a request makes the coalescer non-idle.
    pub async fn wait_for_request(&self) {
        while self.is_idle() {
            self.wake.notified().await;
        }
    }
}
