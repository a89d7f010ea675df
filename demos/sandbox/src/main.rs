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


// Reclaim Sandbox
// Drives the throttling controller through a scripted session against a
// simulated host. Pass a RON configuration path to override the demo settings.

mod host;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reclaim_control::ThrottleController;
use reclaim_core::{ThrottleConfig, ThrottleEvent};
use reclaim_infra::load_config;
use tokio::runtime::Handle;
use tokio::time::sleep;

use crate::host::SimulatedHost;

fn demo_config() -> ThrottleConfig {
    ThrottleConfig {
        tick_interval_ms: 250,
        pressure_monitor_interval_ms: 1000,
        collect_after_elevated: true,
        ..Default::default()
    }
}

/// Time for a burst to coalesce and fire, one tick past the quiet period.
fn settle_window(tick: Duration, coalesce_ticks: u32) -> Duration {
    tick.saturating_mul(coalesce_ticks.saturating_add(1))
}

#[tokio::main]
async fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(path)?,
        None => demo_config(),
    };
    let tick = config.tick_interval();
    let monitor = config.pressure_monitor_interval();
    let window = settle_window(tick, config.coalesce_ticks);

    let host = SimulatedHost::new();
    let (event_tx, event_rx) = crossbeam_channel::bounded(1024);
    let controller = Arc::new(
        ThrottleController::new(config, host.bindings())?.with_event_sender(event_tx),
    );
    controller.start(&Handle::current());

    log::info!("--- Burst of requests with plenty of memory ---");
    for _ in 0..5 {
        controller.request_collection();
        sleep(tick / 2).await;
    }
    sleep(window).await;

    log::info!("--- Burst of requests under pressure ---");
    host.allocate(30);
    for _ in 0..3 {
        controller.request_collection();
    }
    sleep(window).await;

    log::info!("--- Repeated unload requests ---");
    for _ in 0..3 {
        controller.request_unload();
    }
    sleep(Duration::from_millis(500)).await;
    controller.request_unload();

    log::info!("--- Elevated scene ---");
    controller.on_scene_enter("Dance01");
    host.allocate(40);
    controller.request_collection();
    sleep(monitor * 2).await;
    controller.on_scene_exit("Dance01");

    controller.stop().await;

    let stats = controller.stats();
    log::info!("Host collections: {}", host.collections());
    log::info!("Controller stats: {stats:?}");

    let events: Vec<ThrottleEvent> = event_rx.try_iter().collect();
    for event in &events {
        log::debug!("{event:?}");
    }
    log::info!("{} events emitted", events.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settle_window_spans_one_tick_past_the_quiet_period() {
        assert_eq!(
            settle_window(Duration::from_millis(250), 3),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn settle_window_saturates_on_huge_tick_counts() {
        assert_eq!(
            settle_window(Duration::from_secs(1), u32::MAX),
            Duration::from_secs(u64::from(u32::MAX))
        );
        assert_eq!(settle_window(Duration::MAX, 2), Duration::MAX);
    }
}
