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

//! Background tasks of the periodic safety valve.

use std::sync::Weak;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::service::ThrottleController;

/// Forces a collection every `period`, starting one period after spawn.
pub(crate) async fn periodic_collection(
    controller: Weak<ThrottleController>,
    period: Duration,
    cancel: CancellationToken,
) {
    log::debug!(
        "SafetyValve: periodic collection every {} s",
        period.as_secs()
    );
    run_every(period, cancel, || {
        let Some(controller) = controller.upgrade() else {
            return false;
        };
        log::debug!("SafetyValve: periodic collection due");
        controller.run_full_collection(true);
        true
    })
    .await;
    log::debug!("SafetyValve: periodic collection stopped");
}

/// Polls memory while the automatic collector is suppressed and forces a
/// bounded collection when even the elevated limits are breached.
pub(crate) async fn pressure_monitor(
    controller: Weak<ThrottleController>,
    period: Duration,
    cancel: CancellationToken,
) {
    log::debug!(
        "SafetyValve: pressure monitor started ({} ms)",
        period.as_millis()
    );
    run_every(period, cancel, || {
        let Some(controller) = controller.upgrade() else {
            return false;
        };
        controller.relieve_pressure_if_needed();
        true
    })
    .await;
    log::debug!("SafetyValve: pressure monitor stopped");
}

/// Calls `step` once per `period` until it returns `false` or `cancel` fires.
async fn run_every(period: Duration, cancel: CancellationToken, mut step: impl FnMut() -> bool) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !step() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn first_step_waits_one_period() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let task = {
            let calls = calls.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_every(Duration::from_secs(10), cancel, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    true
                })
                .await
            })
        };

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        time::sleep(Duration::from_secs(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        cancel.cancel();
        task.await.expect("task should end cleanly");
    }

    #[tokio::test(start_paused = true)]
    async fn step_returning_false_ends_the_loop() {
        let task = tokio::spawn(run_every(
            Duration::from_secs(1),
            CancellationToken::new(),
            || false,
        ));
        time::timeout(Duration::from_secs(5), task)
            .await
            .expect("loop should end")
            .expect("task should not panic");
    }
}
