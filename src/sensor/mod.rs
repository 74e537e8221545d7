//! Sensor readings and the platform sensor seam.
//!
//! Every reading carries the instant it was taken so the auto-pause logic
//! never reads the clock itself.

pub mod motion;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::utils::{gravity_deviation, vector_magnitude};

pub use motion::MotionTracker;

/// Raw off-body values at or above this are treated as "on body".
pub const OFF_BODY_ON_THRESHOLD: f32 = 0.5;

/// One heart-rate sample as reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartRateReading {
    /// Beats per minute, unvalidated.
    pub bpm: f32,
    /// When the sample was taken.
    pub timestamp: Instant,
}

/// Off-body detector output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffBodyReading {
    /// The device is on the wrist.
    pub on_body: bool,
    /// When the sample was taken.
    pub timestamp: Instant,
}

impl OffBodyReading {
    /// Interpret a raw detector value (1.0 = on body, 0.0 = off body).
    pub fn from_raw(raw: f32, timestamp: Instant) -> Self {
        Self {
            on_body: raw >= OFF_BODY_ON_THRESHOLD,
            timestamp,
        }
    }
}

/// 3-axis accelerometer sample in m/s².
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelerometerReading {
    /// X axis.
    pub x: f32,
    /// Y axis.
    pub y: f32,
    /// Z axis.
    pub z: f32,
    /// When the sample was taken.
    pub timestamp: Instant,
}

impl AccelerometerReading {
    /// Vector magnitude.
    pub fn magnitude(&self) -> f32 {
        vector_magnitude(self.x, self.y, self.z)
    }

    /// Absolute deviation of the magnitude from standard gravity.
    pub fn gravity_deviation(&self) -> f32 {
        gravity_deviation(self.x, self.y, self.z)
    }
}

/// A reading from any of the sensors the controller consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorEvent {
    /// Heart-rate sample.
    HeartRate(HeartRateReading),
    /// Off-body detector change.
    OffBody(OffBodyReading),
    /// Accelerometer sample.
    Accelerometer(AccelerometerReading),
}

impl SensorEvent {
    /// When the underlying sample was taken.
    pub fn timestamp(&self) -> Instant {
        match self {
            Self::HeartRate(r) => r.timestamp,
            Self::OffBody(r) => r.timestamp,
            Self::Accelerometer(r) => r.timestamp,
        }
    }
}

/// Registration lifecycle of the platform sensors.
///
/// Only the heart-rate listener is toggled by auto-pause; the off-body and
/// accelerometer listeners stay registered so they can trigger a resume.
#[cfg_attr(test, mockall::automock)]
pub trait SensorHub: Send + Sync {
    /// Register the heart-rate listener. Returns `false` if unavailable.
    fn register_heart_rate(&self) -> bool;

    /// Unregister the heart-rate listener.
    fn unregister_heart_rate(&self);

    /// Whether the device has an off-body detector.
    fn has_off_body_sensor(&self) -> bool;
}

/// Sensor hub whose readings are fed by hand.
///
/// Tracks the heart-rate registration flag so hosts and tests can check that
/// pausing released the sensor.
#[derive(Debug, Default)]
pub struct ManualSensorHub {
    off_body_sensor: bool,
    heart_rate_registered: AtomicBool,
}

impl ManualSensorHub {
    /// Create a hub, with or without an off-body detector.
    pub fn new(off_body_sensor: bool) -> Self {
        Self {
            off_body_sensor,
            heart_rate_registered: AtomicBool::new(false),
        }
    }

    /// Whether the heart-rate listener is currently registered.
    pub fn is_heart_rate_registered(&self) -> bool {
        self.heart_rate_registered.load(Ordering::SeqCst)
    }
}

impl SensorHub for ManualSensorHub {
    fn register_heart_rate(&self) -> bool {
        self.heart_rate_registered.store(true, Ordering::SeqCst);
        true
    }

    fn unregister_heart_rate(&self) {
        self.heart_rate_registered.store(false, Ordering::SeqCst);
    }

    fn has_off_body_sensor(&self) -> bool {
        self.off_body_sensor
    }
}
