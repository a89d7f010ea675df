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

//! Execution of the expensive collection itself.
//!
//! Two strategies exist:
//! - **Full**: one monolithic native collection followed by a bounded wait for
//!   finalizers. Blocks the caller until done.
//! - **Spread**: two youngest-generation passes, then one pass per older
//!   generation, each followed by a finalizer wait and a pause, so no single
//!   scheduling tick carries the whole pause. At most one spread collection
//!   runs at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reclaim_core::{CollectScope, CollectionKind, ManagedCollector, ThrottleEvent};
use tokio_util::sync::CancellationToken;

use crate::events::EventSink;

/// Youngest-generation passes made before moving to older generations.
const YOUNG_GENERATION_PASSES: u32 = 2;

/// Runs native collections through the host's [`ManagedCollector`].
pub struct CollectionRunner {
    collector: Arc<dyn ManagedCollector>,
    finalizer_timeout: Duration,
    step_pause: Duration,
    spread_in_flight: AtomicBool,
    events: EventSink,
}

impl CollectionRunner {
    /// Creates a runner.
    pub fn new(
        collector: Arc<dyn ManagedCollector>,
        finalizer_timeout: Duration,
        step_pause: Duration,
        events: EventSink,
    ) -> Self {
        Self {
            collector,
            finalizer_timeout,
            step_pause,
            spread_in_flight: AtomicBool::new(false),
            events,
        }
    }

    /// Returns `true` if the host collector exposes generations to spread over.
    pub fn supports_spread(&self) -> bool {
        self.collector.max_generation() > 0
    }

    /// Returns `true` while a spread collection is running.
    pub fn spread_in_flight(&self) -> bool {
        self.spread_in_flight.load(Ordering::SeqCst)
    }

    /// Performs one monolithic full collection and waits for finalizers.
    pub fn run_full(&self, forced: bool) -> Duration {
        let started = Instant::now();
        log::debug!("CollectionRunner: starting full collection (forced={forced})");

        self.collector.collect(CollectScope::Full);
        self.wait_for_finalizers();

        let elapsed = started.elapsed();
        log::info!(
            "CollectionRunner: full collection completed in {} ms",
            elapsed.as_millis()
        );
        self.events.emit(ThrottleEvent::CollectionCompleted {
            kind: CollectionKind::Full,
            forced,
            elapsed_ms: elapsed.as_millis() as u64,
        });
        elapsed
    }

    /// Claims the spread collection slot.
    ///
    /// Returns `None` if a spread collection is already running. The slot is
    /// released when the returned value is dropped.
    pub fn begin_spread(self: &Arc<Self>) -> Option<SpreadCollection> {
        self.spread_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SpreadCollection {
                runner: Arc::clone(self),
            })
    }

    fn wait_for_finalizers(&self) {
        if !self
            .collector
            .wait_for_pending_finalizers(self.finalizer_timeout)
        {
            log::warn!(
                "CollectionRunner: finalizers still pending after {} ms",
                self.finalizer_timeout.as_millis()
            );
        }
    }

    fn collect_generation(&self, generation: u32) {
        let started = Instant::now();
        self.collector.collect(CollectScope::Generation(generation));
        self.wait_for_finalizers();
        log::trace!(
            "CollectionRunner: generation {generation} collected in {} ms",
            started.elapsed().as_millis()
        );
    }
}

impl std::fmt::Debug for CollectionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionRunner")
            .field("finalizer_timeout", &self.finalizer_timeout)
            .field("step_pause", &self.step_pause)
            .field("spread_in_flight", &self.spread_in_flight())
            .finish_non_exhaustive()
    }
}

/// An exclusive claim on the spread collection slot.
#[derive(Debug)]
pub struct SpreadCollection {
    runner: Arc<CollectionRunner>,
}

impl SpreadCollection {
    /// Collects generation by generation, pausing between steps.
    ///
    /// Returns the total elapsed time, or `None` if `cancel` fired first.
    pub async fn run(self, cancel: CancellationToken) -> Option<Duration> {
        let runner = &self.runner;
        let started = Instant::now();
        let max_generation = runner.collector.max_generation();
        log::debug!("CollectionRunner: spread collection started (max generation {max_generation})");

        let steps = std::iter::repeat(0)
            .take(YOUNG_GENERATION_PASSES as usize)
            .chain(1..=max_generation);
        for generation in steps {
            runner.collect_generation(generation);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("CollectionRunner: spread collection cancelled");
                    return None;
                }
                _ = tokio::time::sleep(runner.step_pause) => {}
            }
        }

        let elapsed = started.elapsed();
        log::info!(
            "CollectionRunner: spread collection finished in {} ms",
            elapsed.as_millis()
        );
        runner.events.emit(ThrottleEvent::CollectionCompleted {
            kind: CollectionKind::Spread,
            forced: false,
            elapsed_ms: elapsed.as_millis() as u64,
        });
        Some(elapsed)
    }
}

impl Drop for SpreadCollection {
    fn drop(&mut self) {
        self.runner.spread_in_flight.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCollector {
        max_generation: u32,
        drains: bool,
        calls: Mutex<Vec<CollectScope>>,
        finalizer_waits: Mutex<u32>,
    }

    impl ManagedCollector for RecordingCollector {
        fn collect(&self, scope: CollectScope) {
            crate::lock(&self.calls).push(scope);
        }

        fn wait_for_pending_finalizers(&self, _timeout: Duration) -> bool {
            *crate::lock(&self.finalizer_waits) += 1;
            self.drains
        }

        fn max_generation(&self) -> u32 {
            self.max_generation
        }
    }

    fn runner(max_generation: u32) -> (Arc<RecordingCollector>, Arc<CollectionRunner>) {
        let collector = Arc::new(RecordingCollector {
            max_generation,
            drains: true,
            ..Default::default()
        });
        let runner = Arc::new(CollectionRunner::new(
            collector.clone(),
            Duration::from_millis(100),
            Duration::from_millis(16),
            EventSink::disabled(),
        ));
        (collector, runner)
    }

    #[test]
    fn full_collection_collects_everything_once() {
        let (collector, runner) = runner(2);
        runner.run_full(true);
        assert_eq!(*crate::lock(&collector.calls), vec![CollectScope::Full]);
        assert_eq!(*crate::lock(&collector.finalizer_waits), 1);
    }

    #[test]
    fn full_collection_survives_finalizer_timeout() {
        let collector = Arc::new(RecordingCollector::default());
        let runner = CollectionRunner::new(
            collector.clone(),
            Duration::ZERO,
            Duration::ZERO,
            EventSink::disabled(),
        );
        runner.run_full(false);
        assert_eq!(crate::lock(&collector.calls).len(), 1);
    }

    #[test]
    fn spread_requires_generations() {
        assert!(!runner(0).1.supports_spread());
        assert!(runner(2).1.supports_spread());
    }

    #[tokio::test(start_paused = true)]
    async fn spread_collects_young_twice_then_each_older_generation() {
        let (collector, runner) = runner(2);
        let spread = runner.begin_spread().expect("slot is free");
        let elapsed = spread.run(CancellationToken::new()).await;

        assert!(elapsed.is_some());
        assert_eq!(
            *crate::lock(&collector.calls),
            vec![
                CollectScope::Generation(0),
                CollectScope::Generation(0),
                CollectScope::Generation(1),
                CollectScope::Generation(2),
            ]
        );
        assert_eq!(*crate::lock(&collector.finalizer_waits), 4);
        assert!(!runner.spread_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_spread_at_a_time() {
        let (_collector, runner) = runner(2);
        let first = runner.begin_spread().expect("slot is free");
        assert!(runner.spread_in_flight());
        assert!(runner.begin_spread().is_none());
        drop(first);
        assert!(runner.begin_spread().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_spread_stops_between_steps() {
        let (collector, runner) = runner(2);
        let cancel = CancellationToken::new();
        let spread = runner.begin_spread().expect("slot is free");
        cancel.cancel();

        assert_eq!(spread.run(cancel).await, None);
        assert_eq!(crate::lock(&collector.calls).len(), 1);
        assert!(!runner.spread_in_flight());
    }
}
