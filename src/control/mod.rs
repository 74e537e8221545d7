//! Auto-pause control loop.

pub mod auto_pause;
pub mod watchdog;

pub use auto_pause::{
    AutoPauseController, AutoPauseState, ControllerUpdate, PauseReason, StatusSnapshot,
    ACTIVE_STATUS_TEXT,
};
pub use watchdog::{spawn_watchdog, WatchdogHandle};
