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

//! Non-blocking delivery of [`ThrottleEvent`]s to an optional observer.

use crossbeam_channel::{Sender, TrySendError};
use reclaim_core::ThrottleEvent;

/// Forwards controller events to an attached channel, if any.
///
/// Emitting never blocks the caller: a full or disconnected channel drops the
/// event.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<Sender<ThrottleEvent>>,
}

impl EventSink {
    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// A sink that forwards to `sender`.
    pub fn new(sender: Sender<ThrottleEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Returns `true` if an observer is attached.
    pub fn is_attached(&self) -> bool {
        self.sender.is_some()
    }

    /// Emits one event.
    pub fn emit(&self, event: ThrottleEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::trace!("EventSink: observer channel full, event dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                log::trace!("EventSink: observer disconnected, event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sink_accepts_events() {
        let sink = EventSink::disabled();
        assert!(!sink.is_attached());
        sink.emit(ThrottleEvent::UnloadStarted);
    }

    #[test]
    fn attached_sink_forwards() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = EventSink::new(tx);
        sink.emit(ThrottleEvent::UnloadStarted);
        assert_eq!(rx.try_recv(), Ok(ThrottleEvent::UnloadStarted));
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let sink = EventSink::new(tx);
        sink.emit(ThrottleEvent::UnloadStarted);
        sink.emit(ThrottleEvent::UnloadStarted);
        assert_eq!(rx.len(), 1);
    }
}
