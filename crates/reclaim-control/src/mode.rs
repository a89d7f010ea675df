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

//! Normal/Elevated state machine.
//!
//! The mode selects the active [`ThresholdProfile`] and, in Elevated, holds
//! the host's automatic collector suppressed. Suppression depends on an
//! optional native hook; when the hook cannot be initialized the controller
//! degrades to interception-only throttling and retries on the next attempt.
//!
//! | From | Event | To | Side effect |
//! |---|---|---|---|
//! | any | elevated scene entered / external start | Elevated | suppress collector, start pressure monitor |
//! | any | other scene entered / elevated scene exited / external end | Normal | resume collector, stop pressure monitor |

use std::sync::{Arc, Mutex};

use reclaim_core::{
    AutomaticCollectorControl, Mode, ProfileSet, ThresholdProfile, ThrottleConfig,
    ThrottleEvent, TransitionTrigger,
};
use tokio_util::sync::CancellationToken;

use crate::events::EventSink;
use crate::lock;

/// How a scene name relates to elevated mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneClass {
    /// The scene starts an elevated period.
    Elevated,
    /// The scene runs under the normal profile.
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookStatus {
    Uninitialized,
    Ready,
    Failed,
}

#[derive(Debug)]
struct ModeState {
    mode: Mode,
    suppressed: bool,
    hook: HookStatus,
    degraded_reported: bool,
    monitor: Option<CancellationToken>,
}

/// The result of a transition request.
#[derive(Debug, Clone)]
pub struct ModeChange {
    /// Mode before the request.
    pub from: Mode,
    /// Mode after the request.
    pub to: Mode,
    /// Set when suppression just started: the pressure monitor must run
    /// under this token until it is cancelled.
    pub monitor: Option<CancellationToken>,
    /// Set when suppression just ended.
    pub suppression_ended: bool,
}

impl ModeChange {
    /// Returns `true` if the mode actually switched.
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Owns [`Mode`], the suppression state and the pressure monitor handle.
pub struct ModeController {
    profiles: ProfileSet,
    elevated_enabled: bool,
    patterns: Vec<String>,
    exclusions: Vec<String>,
    auto_control: Option<Arc<dyn AutomaticCollectorControl>>,
    shutdown: CancellationToken,
    state: Mutex<ModeState>,
    events: EventSink,
}

impl ModeController {
    /// Creates a controller in [`Mode::Normal`].
    ///
    /// Pressure monitor tokens are children of `shutdown`, so cancelling it
    /// also stops any running monitor.
    pub fn new(
        config: &ThrottleConfig,
        auto_control: Option<Arc<dyn AutomaticCollectorControl>>,
        shutdown: CancellationToken,
        events: EventSink,
    ) -> Self {
        let lowercase = |patterns: &[String]| -> Vec<String> {
            patterns.iter().map(|p| p.trim().to_lowercase()).collect()
        };
        Self {
            profiles: config.profiles(),
            elevated_enabled: config.elevated_mode_enabled,
            patterns: lowercase(&config.elevated_scene_patterns),
            exclusions: lowercase(&config.excluded_scene_patterns),
            auto_control,
            shutdown,
            state: Mutex::new(ModeState {
                mode: Mode::Normal,
                suppressed: false,
                hook: HookStatus::Uninitialized,
                degraded_reported: false,
                monitor: None,
            }),
            events,
        }
    }

    /// The current mode.
    pub fn mode(&self) -> Mode {
        lock(&self.state).mode
    }

    /// The profile selected by the current mode.
    pub fn active_profile(&self) -> ThresholdProfile {
        *self.profiles.for_mode(self.mode())
    }

    /// Returns `true` while the host's automatic collector is suppressed.
    pub fn is_suppressed(&self) -> bool {
        lock(&self.state).suppressed
    }

    /// Returns `true` while a pressure monitor token is live.
    pub fn has_monitor(&self) -> bool {
        lock(&self.state)
            .monitor
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Classifies a scene by case-insensitive substring match. Exclusions win.
    pub fn classify(&self, scene: &str) -> SceneClass {
        let name = scene.to_lowercase();
        let matches = |patterns: &[String]| patterns.iter().any(|p| name.contains(p.as_str()));
        if matches(&self.patterns) && !matches(&self.exclusions) {
            SceneClass::Elevated
        } else {
            SceneClass::Normal
        }
    }

    /// Switches to [`Mode::Elevated`] and suppresses the automatic collector.
    ///
    /// Does nothing when elevated mode is disabled. Repeated calls keep a
    /// single suppression and a single monitor, but retry a failed hook.
    pub fn enter_elevated(&self, trigger: TransitionTrigger) -> ModeChange {
        let mut state = lock(&self.state);
        let from = state.mode;
        if !self.elevated_enabled {
            log::debug!("ModeController: elevated mode disabled, ignoring {trigger:?}");
            return ModeChange {
                from,
                to: from,
                monitor: None,
                suppression_ended: false,
            };
        }

        state.mode = Mode::Elevated;
        let mut monitor = None;
        if !state.suppressed && self.suppress(&mut state) {
            state.suppressed = true;
            let token = self.shutdown.child_token();
            state.monitor = Some(token.clone());
            monitor = Some(token);
        }

        if from != Mode::Elevated {
            self.report(from, Mode::Elevated, trigger, state.suppressed);
        }
        ModeChange {
            from,
            to: Mode::Elevated,
            monitor,
            suppression_ended: false,
        }
    }

    /// Switches to [`Mode::Normal`], resumes the automatic collector and
    /// stops the pressure monitor.
    pub fn enter_normal(&self, trigger: TransitionTrigger) -> ModeChange {
        let mut state = lock(&self.state);
        let from = state.mode;
        state.mode = Mode::Normal;

        let suppression_ended = state.suppressed;
        if state.suppressed {
            self.resume(&mut state);
        }
        if let Some(token) = state.monitor.take() {
            token.cancel();
        }

        if from != Mode::Normal {
            self.report(from, Mode::Normal, trigger, state.suppressed);
        }
        ModeChange {
            from,
            to: Mode::Normal,
            monitor: None,
            suppression_ended,
        }
    }

    /// Runs `f` with the automatic collector temporarily resumed, then
    /// suppresses it again.
    ///
    /// Returns `None` without running `f` when nothing is suppressed. The
    /// state lock is held throughout, so no transition can interleave.
    pub fn with_collector_resumed<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let state = lock(&self.state);
        if !state.suppressed {
            return None;
        }
        let control = self.auto_control.as_ref()?;

        if !control.set_automatic_collection(true) {
            log::warn!("ModeController: could not resume automatic collector for pressure release");
        }
        let result = f();
        if !control.set_automatic_collection(false) {
            log::warn!("ModeController: could not re-suppress automatic collector");
        }
        drop(state);
        Some(result)
    }

    /// Resumes the collector and cancels the monitor. Used on shutdown.
    pub fn release(&self) {
        let mut state = lock(&self.state);
        if state.suppressed {
            self.resume(&mut state);
        }
        if let Some(token) = state.monitor.take() {
            token.cancel();
        }
    }

    fn suppress(&self, state: &mut ModeState) -> bool {
        let Some(control) = &self.auto_control else {
            log::debug!("ModeController: no automatic collector control, interception only");
            return false;
        };

        if state.hook != HookStatus::Ready {
            match control.initialize() {
                Ok(()) => {
                    log::info!("ModeController: automatic collector hook initialized");
                    state.hook = HookStatus::Ready;
                    state.degraded_reported = false;
                }
                Err(e) => {
                    state.hook = HookStatus::Failed;
                    self.degrade(state, e.to_string());
                    return false;
                }
            }
        }

        if control.set_automatic_collection(false) {
            true
        } else {
            self.degrade(state, "host refused to disable automatic collection".to_string());
            false
        }
    }

    fn resume(&self, state: &mut ModeState) {
        if let Some(control) = &self.auto_control {
            if !control.set_automatic_collection(true) {
                log::warn!("ModeController: host refused to resume automatic collection");
            }
        }
        state.suppressed = false;
    }

    fn degrade(&self, state: &mut ModeState, reason: String) {
        if state.degraded_reported {
            log::debug!("ModeController: suppression still unavailable: {reason}");
            return;
        }
        log::warn!("ModeController: {reason}; degrading to interception-only throttling");
        state.degraded_reported = true;
        self.events.emit(ThrottleEvent::Degraded { reason });
    }

    fn report(&self, from: Mode, to: Mode, trigger: TransitionTrigger, suppressed: bool) {
        log::info!("ModeController: {from:?} -> {to:?} ({trigger:?}, suppressed={suppressed})");
        self.events.emit(ThrottleEvent::ModeTransition {
            from,
            to,
            trigger,
            suppressed,
        });
    }
}

impl std::fmt::Debug for ModeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeController")
            .field("elevated_enabled", &self.elevated_enabled)
            .field("patterns", &self.patterns)
            .field("exclusions", &self.exclusions)
            .field("state", &*lock(&self.state))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reclaim_core::HookError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingControl {
        init_failures_left: AtomicU32,
        init_calls: AtomicU32,
        toggles: Mutex<Vec<bool>>,
    }

    impl RecordingControl {
        fn failing(times: u32) -> Self {
            Self {
                init_failures_left: AtomicU32::new(times),
                ..Default::default()
            }
        }

        fn toggles(&self) -> Vec<bool> {
            lock(&self.toggles).clone()
        }
    }

    impl AutomaticCollectorControl for RecordingControl {
        fn initialize(&self) -> Result<(), HookError> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            let left = self.init_failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.init_failures_left.store(left - 1, Ordering::SeqCst);
                return Err(HookError::InitFailed("symbol not found".to_string()));
            }
            Ok(())
        }

        fn set_automatic_collection(&self, enabled: bool) -> bool {
            lock(&self.toggles).push(enabled);
            true
        }
    }

    fn controller_with(
        config: &ThrottleConfig,
        control: Option<Arc<RecordingControl>>,
    ) -> ModeController {
        ModeController::new(
            config,
            control.map(|c| c as Arc<dyn AutomaticCollectorControl>),
            CancellationToken::new(),
            EventSink::disabled(),
        )
    }

    fn scene(name: &str) -> TransitionTrigger {
        TransitionTrigger::SceneEnter(name.to_string())
    }

    #[test]
    fn starts_in_normal_mode() {
        let controller = controller_with(&ThrottleConfig::default(), None);
        assert_eq!(controller.mode(), Mode::Normal);
        assert_eq!(controller.active_profile(), ThresholdProfile::normal());
        assert!(!controller.is_suppressed());
    }

    #[test]
    fn classify_is_case_insensitive_and_honors_exclusions() {
        let config = ThrottleConfig {
            excluded_scene_patterns: vec!["DanceSelect".to_string()],
            ..Default::default()
        };
        let controller = controller_with(&config, None);
        assert_eq!(controller.classify("Dance01"), SceneClass::Elevated);
        assert_eq!(controller.classify("SceneDance_Rhythm"), SceneClass::Elevated);
        assert_eq!(controller.classify("SceneDanceSelect"), SceneClass::Normal);
        assert_eq!(controller.classify("Title"), SceneClass::Normal);
    }

    #[test]
    fn double_entry_suppresses_exactly_once() {
        let control = Arc::new(RecordingControl::default());
        let controller = controller_with(&ThrottleConfig::default(), Some(control.clone()));

        let first = controller.enter_elevated(scene("Dance01"));
        let second = controller.enter_elevated(scene("Dance01"));

        assert!(first.changed());
        assert!(first.monitor.is_some());
        assert!(!second.changed());
        assert!(second.monitor.is_none());
        assert_eq!(control.toggles(), vec![false]);
        assert_eq!(controller.active_profile(), ThresholdProfile::elevated());
        assert!(controller.is_suppressed());
        assert!(controller.has_monitor());
    }

    #[test]
    fn leaving_elevated_resumes_and_cancels_monitor() {
        let control = Arc::new(RecordingControl::default());
        let controller = controller_with(&ThrottleConfig::default(), Some(control.clone()));

        let entered = controller.enter_elevated(scene("Dance01"));
        let token = entered.monitor.expect("monitor token");
        let left = controller.enter_normal(TransitionTrigger::SceneExit("Dance01".to_string()));

        assert!(left.changed());
        assert!(left.suppression_ended);
        assert!(token.is_cancelled());
        assert_eq!(control.toggles(), vec![false, true]);
        assert_eq!(controller.mode(), Mode::Normal);
        assert!(!controller.has_monitor());
    }

    #[test]
    fn disabled_elevated_mode_keeps_normal() {
        let control = Arc::new(RecordingControl::default());
        let config = ThrottleConfig {
            elevated_mode_enabled: false,
            ..Default::default()
        };
        let controller = controller_with(&config, Some(control.clone()));

        let change = controller.enter_elevated(TransitionTrigger::ExternalStart);
        assert!(!change.changed());
        assert_eq!(controller.mode(), Mode::Normal);
        assert!(control.toggles().is_empty());
    }

    #[test]
    fn failed_hook_degrades_and_retries_lazily() {
        let control = Arc::new(RecordingControl::failing(1));
        let (tx, rx) = crossbeam_channel::unbounded();
        let controller = ModeController::new(
            &ThrottleConfig::default(),
            Some(control.clone() as Arc<dyn AutomaticCollectorControl>),
            CancellationToken::new(),
            EventSink::new(tx),
        );

        let first = controller.enter_elevated(scene("Dance01"));
        assert_eq!(controller.mode(), Mode::Elevated);
        assert!(first.monitor.is_none());
        assert!(!controller.is_suppressed());
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, ThrottleEvent::Degraded { .. })));

        // The next attempt initializes successfully.
        let second = controller.enter_elevated(scene("Dance02"));
        assert!(second.monitor.is_some());
        assert!(controller.is_suppressed());
        assert_eq!(control.init_calls.load(Ordering::SeqCst), 2);
        assert_eq!(control.toggles(), vec![false]);
    }

    #[test]
    fn missing_control_is_interception_only() {
        let controller = controller_with(&ThrottleConfig::default(), None);
        let change = controller.enter_elevated(scene("Dance01"));
        assert!(change.changed());
        assert!(change.monitor.is_none());
        assert_eq!(controller.active_profile(), ThresholdProfile::elevated());
        assert!(!controller.is_suppressed());
    }

    #[test]
    fn collector_resumed_only_while_suppressed() {
        let control = Arc::new(RecordingControl::default());
        let controller = controller_with(&ThrottleConfig::default(), Some(control.clone()));

        assert_eq!(controller.with_collector_resumed(|| 1), None);

        controller.enter_elevated(scene("Dance01"));
        assert_eq!(controller.with_collector_resumed(|| 7), Some(7));
        assert_eq!(control.toggles(), vec![false, true, false]);
        assert!(controller.is_suppressed());
    }

    #[test]
    fn monitor_tokens_follow_shutdown() {
        let control = Arc::new(RecordingControl::default());
        let shutdown = CancellationToken::new();
        let controller = ModeController::new(
            &ThrottleConfig::default(),
            Some(control as Arc<dyn AutomaticCollectorControl>),
            shutdown.clone(),
            EventSink::disabled(),
        );
        let token = controller
            .enter_elevated(scene("Dance01"))
            .monitor
            .expect("monitor token");
        shutdown.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn release_resumes_collector() {
        let control = Arc::new(RecordingControl::default());
        let controller = controller_with(&ThrottleConfig::default(), Some(control.clone()));
        controller.enter_elevated(scene("Dance01"));
        controller.release();
        assert!(!controller.is_suppressed());
        assert_eq!(control.toggles(), vec![false, true]);
    }
}
