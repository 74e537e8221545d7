//! Wire formats exchanged with centrals.
//!
//! This module contains the Heart Rate Measurement codec.

pub mod heart_rate;

pub use heart_rate::{encode, encode_clamped, HeartRateMeasurement, SensorContact};
