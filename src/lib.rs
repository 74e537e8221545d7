// Allow derivable impls for clarity
#![allow(clippy::derivable_impls)]

//! # hr-peripheral
//!
//! Turns a wearable's heart-rate sensor into a standard Bluetooth Low Energy
//! Heart Rate Service (0x180D) peripheral.
//!
//! The crate owns the protocol state of the peripheral role: the GATT server
//! and advertising lifecycle, the single-subscriber CCCD state machine, the
//! Heart Rate Measurement payload, the known-device list, and an auto-pause
//! controller that stops advertising while the device is off the wrist or
//! motionless.
//!
//! ## Features
//!
//! - **Peripheral Engine**: start/stop advertising, notify the subscriber,
//!   answer reads, forget and unbond devices
//! - **Auto-Pause**: off-body, accelerometer and watchdog driven pause/resume
//! - **Known Devices**: every connecting central is remembered on disk
//! - **Energy Estimate**: heart-rate based calorie accumulation
//! - **Validation Client**: a btleplug central that subscribes to a running
//!   peripheral and decodes its measurements
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use hr_peripheral::{
//!     HeartRateReading, HeartRateService, LoopbackDriver, ManualSensorHub, Result,
//!     SensorEvent, ServiceConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Any PeripheralDriver works here; the loopback driver runs in memory.
//!     let driver = Arc::new(LoopbackDriver::new());
//!     let sensors = Arc::new(ManualSensorHub::new(true));
//!     let service = HeartRateService::new(driver, sensors, ServiceConfig::default())?;
//!
//!     if service.start().await {
//!         println!("Advertising Heart Rate Service");
//!     }
//!
//!     service
//!         .handle_sensor_event(SensorEvent::HeartRate(HeartRateReading {
//!             bpm: 72.0,
//!             timestamp: Instant::now(),
//!         }))
//!         .await;
//!
//!     println!("Known devices: {:?}", service.known_devices());
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! The peripheral role is reached through the [`PeripheralDriver`] trait.
//! Implement it over the host's GATT server API; [`LoopbackDriver`] is an
//! in-memory implementation for tests and demos.
//!
//! The validation client uses btleplug and needs BlueZ on Linux, Bluetooth
//! permission on macOS and Windows 10 or later on Windows.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for config and status types

// Public modules
pub mod ble;
pub mod calories;
pub mod config;
pub mod control;
pub mod error;
pub mod handle;
pub mod protocol;
pub mod sensor;
pub mod service;
pub mod storage;
pub mod utils;

// Re-exports for convenience
pub use error::{DriverError, Error, Result, StartError};
pub use handle::CallbackHandle;
pub use service::HeartRateService;

// Re-export commonly used types from submodules
pub use ble::advertising::{AdvertisingSettings, AdvertisingState};
pub use ble::client::HeartRateClient;
pub use ble::device::DeviceIdentifier;
pub use ble::driver::{PeripheralDriver, PeripheralEvent, RadioStatus};
pub use ble::loopback::LoopbackDriver;
pub use ble::peripheral::{Broadcaster, PeripheralEngine, SubscriptionEvent};
pub use calories::{BodyProfile, CalorieEstimator, EnergyEstimator, Sex};
pub use config::{AutoPauseConfig, PeripheralConfig, ServiceConfig};
pub use control::{
    AutoPauseController, AutoPauseState, ControllerUpdate, PauseReason, StatusSnapshot,
};
pub use protocol::heart_rate::HeartRateMeasurement;
pub use sensor::{
    AccelerometerReading, HeartRateReading, ManualSensorHub, OffBodyReading, SensorEvent,
    SensorHub,
};
pub use storage::KnownDeviceStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<HeartRateService>();
        let _ = std::any::TypeId::of::<PeripheralEngine>();
        let _ = std::any::TypeId::of::<AutoPauseController>();
        let _ = std::any::TypeId::of::<KnownDeviceStore>();
        let _ = std::any::TypeId::of::<LoopbackDriver>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<StatusSnapshot>();
    }

    #[test]
    fn test_heart_rate_encoding() {
        assert_eq!(protocol::heart_rate::encode(72), [0x00, 72]);
        assert_eq!(protocol::heart_rate::encode_clamped(300), [0x00, 255]);
    }
}
