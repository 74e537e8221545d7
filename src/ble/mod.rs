//! BLE peripheral module.
//!
//! This module provides the GATT service model, the platform driver seam and
//! the Heart Rate Service peripheral engine built on top of it, plus a small
//! btleplug central used to validate a running peripheral.

pub mod advertising;
pub mod client;
pub mod device;
pub mod driver;
pub mod gatt;
pub mod loopback;
pub mod peripheral;
pub mod uuids;

pub use advertising::{AdvertisingConfig, AdvertisingSettings, AdvertisingState};
pub use client::{ClientState, HeartRateClient};
pub use device::DeviceIdentifier;
pub use driver::{PeripheralDriver, PeripheralEvent, RadioStatus};
pub use gatt::{heart_rate_service, ServiceDefinition};
pub use loopback::LoopbackDriver;
pub use peripheral::{Broadcaster, PeripheralEngine, SubscriptionEvent};
pub use uuids::*;
