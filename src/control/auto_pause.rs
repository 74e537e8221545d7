//! Sensor-driven pause/resume of heart-rate broadcasting.
//!
//! Three sources decide whether the peripheral should be active:
//! - the off-body detector, authoritative when present;
//! - the accelerometer, which pauses after a still window and resumes on
//!   any motion;
//! - a level-triggered watchdog that ends pauses longer than
//!   `resume_after`.
//!
//! Accepted heart-rate samples accumulate energy and are forwarded to the
//! broadcaster while active.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, trace, warn};

use crate::ble::peripheral::Broadcaster;
use crate::calories::EnergyEstimator;
use crate::config::AutoPauseConfig;
use crate::error::StartError;
use crate::handle::CallbackHandle;
use crate::sensor::{
    AccelerometerReading, HeartRateReading, MotionTracker, OffBodyReading, SensorEvent, SensorHub,
};
use crate::utils::validate_bpm;

/// Status text while broadcasting.
pub const ACTIVE_STATUS_TEXT: &str = "Advertising Heart Rate Service";

/// Whether broadcasting is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoPauseState {
    /// Sensor registered and advertising requested.
    Active,
    /// Sensor released and advertising stopped.
    Paused {
        /// When the pause began.
        since: Instant,
    },
}

impl AutoPauseState {
    /// Check if paused.
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused { .. })
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// How long the pause has lasted at `now`, or `None` while active.
    pub fn paused_for(&self, now: Instant) -> Option<Duration> {
        match self {
            Self::Active => None,
            Self::Paused { since } => Some(now.saturating_duration_since(*since)),
        }
    }
}

impl std::fmt::Display for AutoPauseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Paused { .. } => write!(f, "Paused"),
        }
    }
}

/// What caused the last transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PauseReason {
    /// Initial activation.
    Startup,
    /// The off-body detector reported the device off the wrist.
    OffBody,
    /// The off-body detector reported the device back on the wrist.
    OnBody,
    /// The accelerometer saw motion.
    Motion,
    /// The accelerometer saw no motion for the still window.
    Stillness,
    /// A pause outlasted the watchdog threshold.
    Watchdog,
    /// Requested by the host.
    Manual,
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::OffBody => write!(f, "off wrist"),
            Self::OnBody => write!(f, "on wrist"),
            Self::Motion => write!(f, "motion"),
            Self::Stillness => write!(f, "no motion"),
            Self::Watchdog => write!(f, "watchdog"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Externally observed controller status.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusSnapshot {
    /// Whether broadcasting is paused.
    pub paused: bool,
    /// Cause of the last transition.
    pub reason: PauseReason,
    /// Wall-clock time of the last transition.
    pub since: DateTime<Utc>,
    /// Human-readable status line.
    pub text: String,
    /// Last accepted heart rate.
    pub current_bpm: Option<u8>,
    /// Accumulated energy in kcal.
    pub kcal: f64,
}

/// Update published on every transition and accepted sample.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerUpdate {
    /// The controller paused or resumed.
    StateChanged(StatusSnapshot),
    /// A heart-rate sample was accepted.
    HeartRate {
        /// Accepted heart rate.
        bpm: u8,
        /// Accumulated energy in kcal.
        kcal: f64,
    },
}

struct ControllerState {
    pause: AutoPauseState,
    reason: PauseReason,
    changed_at: DateTime<Utc>,
    text: String,
    motion: MotionTracker,
    current_bpm: Option<u8>,
    kcal: f64,
    shut_down: bool,
}

impl ControllerState {
    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            paused: self.pause.is_paused(),
            reason: self.reason,
            since: self.changed_at,
            text: self.text.clone(),
            current_bpm: self.current_bpm,
            kcal: self.kcal,
        }
    }
}

fn status_text(paused: bool, reason: PauseReason) -> String {
    if paused {
        format!("Paused ({})", reason)
    } else {
        ACTIVE_STATUS_TEXT.to_string()
    }
}

/// Decides between active and paused and drives the broadcaster.
///
/// All decisions are serialized by one async mutex, which is held across the
/// broadcaster calls so a transition completes before the next input is
/// considered.
pub struct AutoPauseController {
    broadcaster: Arc<dyn Broadcaster>,
    sensors: Arc<dyn SensorHub>,
    estimator: Arc<dyn EnergyEstimator>,
    config: AutoPauseConfig,
    state: Mutex<ControllerState>,
    updates_tx: broadcast::Sender<ControllerUpdate>,
    callback_counter: AtomicU64,
}

impl AutoPauseController {
    /// Create a controller in the `Active` state.
    ///
    /// Nothing is registered or started until [`start`](Self::start).
    pub fn new(
        broadcaster: Arc<dyn Broadcaster>,
        sensors: Arc<dyn SensorHub>,
        estimator: Arc<dyn EnergyEstimator>,
        config: AutoPauseConfig,
    ) -> Self {
        let (updates_tx, _) = broadcast::channel(64);

        Self {
            broadcaster,
            sensors,
            estimator,
            config,
            state: Mutex::new(ControllerState {
                pause: AutoPauseState::Active,
                reason: PauseReason::Startup,
                changed_at: Utc::now(),
                text: ACTIVE_STATUS_TEXT.to_string(),
                motion: MotionTracker::new(),
                current_bpm: None,
                kcal: 0.0,
                shut_down: false,
            }),
            updates_tx,
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Register the heart-rate sensor and start broadcasting.
    ///
    /// # Errors
    ///
    /// Returns the broadcaster's [`StartError`]. The controller is `Active`
    /// either way; the watchdog or the next resume retries.
    pub async fn start(&self) -> std::result::Result<(), StartError> {
        let mut state = self.state.lock().await;

        if !self.sensors.register_heart_rate() {
            warn!("Heart rate sensor unavailable");
        }
        let result = self.broadcaster.start().await;

        state.pause = AutoPauseState::Active;
        state.reason = PauseReason::Startup;
        state.changed_at = Utc::now();
        state.text = status_text(false, PauseReason::Startup);
        state.motion = MotionTracker::new();
        state.shut_down = false;
        self.publish(ControllerUpdate::StateChanged(state.snapshot()));

        if let Err(e) = &result {
            warn!("Initial start failed: {}", e);
        }
        result
    }

    /// Release the sensor and stop broadcasting.
    ///
    /// Until the next [`start`](Self::start), sensor input and watchdog ticks
    /// no longer pause or resume anything and samples are not forwarded.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.shut_down = true;
        self.sensors.unregister_heart_rate();
        self.broadcaster.stop().await;
        info!("Auto-pause controller shut down");
    }

    /// Request a pause (`true`) or resume (`false`) now.
    ///
    /// Returns `true` if the state changed; a request matching the current
    /// state is a no-op.
    pub async fn pause(&self, paused: bool, reason: PauseReason) -> bool {
        self.pause_at(paused, reason, Instant::now()).await
    }

    /// Like [`pause`](Self::pause) with an explicit timestamp.
    pub async fn pause_at(&self, paused: bool, reason: PauseReason, now: Instant) -> bool {
        let mut state = self.state.lock().await;
        self.transition(&mut state, paused, reason, now).await
    }

    /// Dispatch one sensor reading.
    pub async fn handle_event(&self, event: SensorEvent) {
        match event {
            SensorEvent::HeartRate(reading) => {
                self.handle_heart_rate(reading).await;
            }
            SensorEvent::OffBody(reading) => self.handle_off_body(reading).await,
            SensorEvent::Accelerometer(reading) => self.handle_accelerometer(reading).await,
        }
    }

    /// Apply an off-body detector reading.
    pub async fn handle_off_body(&self, reading: OffBodyReading) {
        debug!("Off-body reading: on_body={}", reading.on_body);

        let reason = if reading.on_body {
            PauseReason::OnBody
        } else {
            PauseReason::OffBody
        };
        self.pause_at(!reading.on_body, reason, reading.timestamp)
            .await;
    }

    /// Apply an accelerometer reading.
    pub async fn handle_accelerometer(&self, reading: AccelerometerReading) {
        let now = reading.timestamp;
        let deviation = reading.gravity_deviation();

        let mut state = self.state.lock().await;
        state.motion.seed(now);

        if deviation > self.config.motion_threshold {
            trace!("Motion: deviation {:.3} m/s²", deviation);
            state.motion.record_motion(now);
            if state.pause.is_paused() {
                self.transition(&mut state, false, PauseReason::Motion, now)
                    .await;
            }
            return;
        }

        let idle = state.motion.idle_for(now).unwrap_or_default();
        if state.pause.is_active() && idle >= self.config.still_window {
            debug!("No motion for {:?}", idle);
            self.transition(&mut state, true, PauseReason::Stillness, now)
                .await;
        }
    }

    /// Watchdog check. Resumes if paused for longer than `resume_after`.
    ///
    /// Returns `true` if it forced a resume.
    pub async fn tick(&self, now: Instant) -> bool {
        let mut state = self.state.lock().await;

        match state.pause.paused_for(now) {
            Some(paused_for) if paused_for > self.config.resume_after => {
                info!("Paused for {:?}, watchdog forcing resume", paused_for);
                self.transition(&mut state, false, PauseReason::Watchdog, now)
                    .await
            }
            _ => false,
        }
    }

    /// Apply a heart-rate reading.
    ///
    /// Returns the accepted bpm, or `None` if the reading was discarded.
    pub async fn handle_heart_rate(&self, reading: HeartRateReading) -> Option<u8> {
        let Some(bpm) = validate_bpm(reading.bpm, self.config.min_bpm, self.config.max_bpm) else {
            trace!("Discarding heart rate reading {}", reading.bpm);
            return None;
        };

        let mut state = self.state.lock().await;
        state.current_bpm = Some(bpm);
        state.kcal += self.estimator.kcal_per_minute(bpm) / 60.0;
        let kcal = state.kcal;

        if state.pause.is_active() && !state.shut_down {
            self.broadcaster.notify(bpm).await;
        }
        drop(state);

        self.publish(ControllerUpdate::HeartRate { bpm, kcal });
        Some(bpm)
    }

    /// Current pause state.
    pub async fn state(&self) -> AutoPauseState {
        self.state.lock().await.pause
    }

    /// Current status.
    pub async fn snapshot(&self) -> StatusSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Controller thresholds.
    pub fn config(&self) -> &AutoPauseConfig {
        &self.config
    }

    /// Subscribe to controller updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerUpdate> {
        self.updates_tx.subscribe()
    }

    /// Register a callback for controller updates.
    pub fn on_update<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(ControllerUpdate) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.updates_tx.subscribe();

        let handle = tokio::spawn(async move {
            while let Ok(update) = rx.recv().await {
                callback(update);
            }
        });

        CallbackHandle::for_task(callback_id, handle)
    }

    fn publish(&self, update: ControllerUpdate) {
        let _ = self.updates_tx.send(update);
    }

    async fn transition(
        &self,
        state: &mut ControllerState,
        paused: bool,
        reason: PauseReason,
        now: Instant,
    ) -> bool {
        if state.shut_down {
            trace!("Shut down, ignoring {} request", reason);
            return false;
        }
        if state.pause.is_paused() == paused {
            trace!("Already {}, ignoring {} request", state.pause, reason);
            return false;
        }

        if paused {
            self.sensors.unregister_heart_rate();
            self.broadcaster.stop().await;
            state.pause = AutoPauseState::Paused { since: now };
        } else {
            if !self.sensors.register_heart_rate() {
                warn!("Heart rate sensor unavailable on resume");
            }
            // Active means "trying to advertise"; a failed start is retried later.
            if let Err(e) = self.broadcaster.start().await {
                warn!("Resume could not start advertising: {}", e);
            }
            state.pause = AutoPauseState::Active;
            state.motion.reset(now);
        }

        state.reason = reason;
        state.changed_at = Utc::now();
        state.text = status_text(paused, reason);
        info!("Auto-pause: {} ({})", state.pause, reason);

        self.publish(ControllerUpdate::StateChanged(state.snapshot()));
        true
    }
}
