//! Periodic auto-pause watchdog.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::control::auto_pause::AutoPauseController;
use crate::handle::CallbackHandle;

/// Handle to a running watchdog. Dropping it stops the task.
pub type WatchdogHandle = CallbackHandle;

/// Spawn a task that calls [`AutoPauseController::tick`] every `period`.
///
/// The check is level-triggered, so delayed or missed ticks only delay a
/// resume. The task stops when the returned handle is dropped.
pub fn spawn_watchdog(controller: Arc<AutoPauseController>, period: Duration) -> WatchdogHandle {
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            if controller.tick(Instant::now()).await {
                debug!("Watchdog resumed broadcasting");
            }
        }
    });

    CallbackHandle::for_task(0, handle)
}
