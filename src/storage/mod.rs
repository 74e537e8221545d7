//! Persisted peripheral state.

pub mod known_devices;

pub use known_devices::KnownDeviceStore;
