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

//! The controller service: single entry point for the host integration layer.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crossbeam_channel::Sender;
use reclaim_core::{
    AutomaticCollectorControl, ConfigError, HostInterceptor, ManagedCollector, MemorySampler,
    Mode, ProfileSet, ResourceUnloader, ThrottleConfig, ThrottleEvent, TransitionTrigger,
    UnloadHandleRef,
};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::coalescer::RequestCoalescer;
use crate::collection::CollectionRunner;
use crate::decision::DecisionEngine;
use crate::events::EventSink;
use crate::lock;
use crate::mode::{ModeChange, ModeController, SceneClass};
use crate::stats::{StatsSnapshot, ThrottleStats};
use crate::unload::{UnloadAction, UnloadSerializer};
use crate::valve;

/// The host primitives the controller is built on.
#[derive(Clone)]
pub struct HostBindings {
    /// Reads OS and process memory statistics.
    pub sampler: Arc<dyn MemorySampler>,
    /// The native collector.
    pub collector: Arc<dyn ManagedCollector>,
    /// The original "unload unused resources" primitive.
    pub unloader: Arc<dyn ResourceUnloader>,
    /// Automatic collector toggle, if the host offers one.
    pub auto_control: Option<Arc<dyn AutomaticCollectorControl>>,
}

/// Decides when collections and unloads actually execute.
///
/// Construct once, wrap in an [`Arc`], call [`start`](Self::start) from inside
/// a tokio runtime and route host notifications to the `on_*` and `request_*`
/// methods. Background tasks only hold weak references, so dropping the last
/// handle ends them.
pub struct ThrottleController {
    config: ThrottleConfig,
    bindings: HostBindings,
    profiles: ProfileSet,
    decision: DecisionEngine,
    coalescer: Arc<RequestCoalescer>,
    unloads: UnloadSerializer,
    runner: Arc<CollectionRunner>,
    mode: ModeController,
    stats: Arc<ThrottleStats>,
    events: EventSink,
    shutdown: CancellationToken,
    runtime: Mutex<Option<Handle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ThrottleController {
    /// Validates `config` and builds an idle controller in [`Mode::Normal`].
    pub fn new(config: ThrottleConfig, bindings: HostBindings) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::assemble(config, bindings, EventSink::disabled()))
    }

    /// Attaches a channel receiving every [`ThrottleEvent`].
    ///
    /// Must be called before [`start`](Self::start).
    pub fn with_event_sender(self, sender: Sender<ThrottleEvent>) -> Self {
        Self::assemble(self.config.clone(), self.bindings.clone(), EventSink::new(sender))
    }

    fn assemble(config: ThrottleConfig, bindings: HostBindings, events: EventSink) -> Self {
        let shutdown = CancellationToken::new();
        let runner = Arc::new(CollectionRunner::new(
            bindings.collector.clone(),
            config.finalizer_timeout(),
            config.incremental_step(),
            events.clone(),
        ));
        let mode = ModeController::new(
            &config,
            bindings.auto_control.clone(),
            shutdown.clone(),
            events.clone(),
        );
        Self {
            profiles: config.profiles(),
            decision: DecisionEngine::new(config.maximize_memory_usage, events.clone()),
            coalescer: Arc::new(RequestCoalescer::new(config.coalesce_ticks)),
            unloads: UnloadSerializer::new(bindings.unloader.clone(), config.disable_unload),
            runner,
            mode,
            stats: Arc::new(ThrottleStats::new()),
            events,
            shutdown,
            runtime: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            config,
            bindings,
        }
    }

    /// Spawns the coalescer loop and, if enabled, the periodic collection
    /// timer on `runtime`. Calling it twice has no effect.
    pub fn start(self: &Arc<Self>, runtime: &Handle) {
        {
            let mut slot = lock(&self.runtime);
            if slot.is_some() {
                log::warn!("ThrottleController: already started");
                return;
            }
            *slot = Some(runtime.clone());
        }

        let task = runtime.spawn(coalescer_loop(
            Arc::downgrade(self),
            Arc::clone(&self.coalescer),
            self.config.tick_interval(),
            self.shutdown.child_token(),
        ));
        self.track(task);

        if self.config.periodic_collection_enabled {
            let task = runtime.spawn(valve::periodic_collection(
                Arc::downgrade(self),
                self.config.periodic_interval(),
                self.shutdown.child_token(),
            ));
            self.track(task);
        }

        log::info!(
            "ThrottleController: started (throttling={}, window={} ticks of {} ms, periodic={})",
            self.config.maximize_memory_usage,
            self.coalescer.window(),
            self.config.tick_interval_ms,
            self.config.periodic_collection_enabled
        );
    }

    /// Absorbs one intercepted native collection request.
    pub fn request_collection(&self) {
        self.stats.record_request();
        self.coalescer.request();
        log::trace!("ThrottleController: collection request absorbed");
    }

    /// Handles one intercepted unload request.
    ///
    /// Returns `None` only when unloading is disabled.
    pub fn request_unload(&self) -> Option<UnloadHandleRef> {
        let (handle, action) = self.unloads.request_unload(|| self.plenty_of_memory(false));
        match action {
            UnloadAction::Started => {
                log::debug!("ThrottleController: unused resource unload started");
                self.stats.record_unload_started();
                self.events.emit(ThrottleEvent::UnloadStarted);
            }
            UnloadAction::Reused => self.stats.record_unload_reused(),
            UnloadAction::Disabled => {}
        }
        handle
    }

    /// The gated full collection.
    ///
    /// Skips when `ignore_pressure_check` is `false` and memory is plentiful.
    /// Returns `true` if a collection ran.
    pub fn run_full_collection(&self, ignore_pressure_check: bool) -> bool {
        if !ignore_pressure_check && self.plenty_of_memory(false) {
            self.stats.record_skip();
            return false;
        }
        self.runner.run_full(ignore_pressure_check);
        self.stats.record_collection();
        true
    }

    /// Samples memory and checks it against the active profile.
    pub fn plenty_of_memory(&self, ignore_global_toggle: bool) -> bool {
        let mode = self.mode.mode();
        self.decision.plenty_of_memory(
            mode,
            self.profiles.for_mode(mode),
            self.bindings.sampler.as_ref(),
            ignore_global_toggle,
        )
    }

    /// A scene was entered.
    pub fn on_scene_enter(self: &Arc<Self>, scene: &str) {
        let trigger = TransitionTrigger::SceneEnter(scene.to_string());
        let change = match self.mode.classify(scene) {
            SceneClass::Elevated => self.mode.enter_elevated(trigger),
            SceneClass::Normal => self.mode.enter_normal(trigger),
        };
        self.apply(change);
    }

    /// A scene was exited.
    pub fn on_scene_exit(self: &Arc<Self>, scene: &str) {
        let leaving_elevated = self.mode.mode() == Mode::Elevated
            && self.mode.classify(scene) == SceneClass::Elevated;

        if leaving_elevated {
            let change = self
                .mode
                .enter_normal(TransitionTrigger::SceneExit(scene.to_string()));
            self.apply(change);
            if self.config.collect_after_elevated {
                log::info!("ThrottleController: collecting after elevated scene '{scene}'");
                self.run_full_collection(true);
                self.run_full_collection(true);
                return;
            }
        }

        if self.config.full_collect_on_scene_unload {
            log::debug!("ThrottleController: collecting on unload of '{scene}'");
            self.run_full_collection(true);
        }
    }

    /// A cooperating feature started an elevated period.
    pub fn on_elevated_start(self: &Arc<Self>) {
        let change = self.mode.enter_elevated(TransitionTrigger::ExternalStart);
        self.apply(change);
    }

    /// A cooperating feature ended an elevated period.
    pub fn on_elevated_end(self: &Arc<Self>) {
        let change = self.mode.enter_normal(TransitionTrigger::ExternalEnd);
        let changed = change.changed();
        self.apply(change);
        if changed && self.config.collect_after_elevated {
            self.run_full_collection(true);
        }
    }

    /// Wires the host's native entry points to this controller.
    pub fn install_hooks(self: &Arc<Self>, interceptor: &dyn HostInterceptor) {
        let weak = Arc::downgrade(self);
        interceptor.intercept_collection_requests(Box::new(move || {
            if let Some(controller) = weak.upgrade() {
                controller.request_collection();
            }
        }));

        let weak = Arc::downgrade(self);
        interceptor.intercept_unload_requests(Box::new(move || {
            weak.upgrade()
                .and_then(|controller| controller.request_unload())
        }));
        log::info!("ThrottleController: host hooks installed");
    }

    /// Turns the diagnostic unload kill switch on or off.
    pub fn set_unload_disabled(&self, disabled: bool) {
        log::info!("ThrottleController: unloading disabled={disabled}");
        self.unloads.set_disabled(disabled);
    }

    /// The current mode.
    pub fn mode(&self) -> Mode {
        self.mode.mode()
    }

    /// Returns `true` while the host's automatic collector is suppressed.
    pub fn is_suppressed(&self) -> bool {
        self.mode.is_suppressed()
    }

    /// Reads the running counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Cancels every background task and resumes the automatic collector.
    ///
    /// Host calls already dispatched are not interrupted.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            log::info!("ThrottleController: shutting down");
        }
        self.shutdown.cancel();
        self.mode.release();
    }

    /// [`shutdown`](Self::shutdown), then waits for the background tasks.
    pub async fn stop(&self) {
        self.shutdown();
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    log::warn!("ThrottleController: background task failed: {e}");
                }
            }
        }
    }

    /// Called by the pressure monitor. Returns `true` if a collection ran.
    pub(crate) fn relieve_pressure_if_needed(&self) -> bool {
        if !self.mode.is_suppressed() {
            return false;
        }
        let mode = self.mode.mode();
        let snapshot = match self.bindings.sampler.sample() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("ThrottleController: {e}; releasing pressure");
                None
            }
        };
        let verdict =
            self.decision
                .decide(mode, self.profiles.for_mode(mode), snapshot.as_ref(), true);
        if verdict.is_plenty() {
            return false;
        }

        log::warn!(
            "ThrottleController: pressure exceeds {:?} limits while suppressed ({:?}), forcing collection",
            mode,
            verdict.reason
        );
        let collected = self
            .mode
            .with_collector_resumed(|| self.runner.run_full(true))
            .is_some();
        if collected {
            self.stats.record_collection();
            self.stats.record_pressure_release();
            self.events
                .emit(ThrottleEvent::PressureReleased { snapshot });
        }
        collected
    }

    fn on_coalesced_fire(&self) {
        self.stats.record_fire();
        if self.plenty_of_memory(false) {
            self.stats.record_skip();
            return;
        }

        if self.config.incremental_collection && self.runner.supports_spread() {
            let Some(spread) = self.runner.begin_spread() else {
                log::debug!("ThrottleController: spread collection in flight, fire absorbed");
                return;
            };
            if let Some(runtime) = self.runtime_handle() {
                let stats = self.stats.clone();
                let cancel = self.shutdown.child_token();
                let task = runtime.spawn(async move {
                    if spread.run(cancel).await.is_some() {
                        stats.record_collection();
                    }
                });
                self.track(task);
                return;
            }
        }

        self.runner.run_full(false);
        self.stats.record_collection();
    }

    fn apply(self: &Arc<Self>, change: ModeChange) {
        if change.changed() {
            self.stats.record_transition();
        }
        if let Some(token) = change.monitor {
            self.spawn_monitor(token);
        }
    }

    fn spawn_monitor(self: &Arc<Self>, token: CancellationToken) {
        let Some(runtime) = self.runtime_handle() else {
            log::warn!("ThrottleController: no runtime, pressure monitor not started");
            return;
        };
        let task = runtime.spawn(valve::pressure_monitor(
            Arc::downgrade(self),
            self.config.pressure_monitor_interval(),
            token,
        ));
        self.track(task);
    }

    fn runtime_handle(&self) -> Option<Handle> {
        lock(&self.runtime)
            .clone()
            .or_else(|| Handle::try_current().ok())
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }
}

impl Drop for ThrottleController {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.mode.release();
    }
}

impl std::fmt::Debug for ThrottleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleController")
            .field("mode", &self.mode)
            .field("coalescer", &self.coalescer)
            .field("unloads", &self.unloads)
            .field("runner", &self.runner)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

/// Counts scheduling ticks while a collection request is pending.
///
/// Idle until a request arrives; the tick grid restarts from that request so
/// the countdown never fires early.
async fn coalescer_loop(
    controller: Weak<ThrottleController>,
    coalescer: Arc<RequestCoalescer>,
    tick: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if coalescer.is_idle() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = coalescer.wait_for_request() => ticker.reset(),
            }
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if coalescer.tick() {
            let Some(controller) = controller.upgrade() else {
                break;
            };
            controller.on_coalesced_fire();
        }
    }
    log::debug!("ThrottleController: coalescer loop stopped");
}
