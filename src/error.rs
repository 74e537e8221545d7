//! Error types for the hr-peripheral crate.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the central-side BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The peripheral could not be brought up.
    #[error(transparent)]
    Start(#[from] StartError),

    /// A platform BLE stack call failed.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// No peripheral advertising the Heart Rate Service was found.
    #[error("Peripheral not found: {identifier}")]
    PeripheralNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Operation requires a connection but the peripheral is not connected.
    #[error("Peripheral not connected")]
    NotConnected,

    /// Failed to establish a connection to the peripheral.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Invalid data was received from a remote device.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// Reading or writing persisted state failed.
    #[error("Storage error at {}: {source}", .path.display())]
    Storage {
        /// The file that could not be read or written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An operation did not complete in time.
    #[error("Operation timed out")]
    Timeout,

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },
}

/// Why the peripheral engine could not start advertising.
///
/// Precondition failures are reported here instead of panicking; the engine
/// is left in `Failed` and a later `start()` retries from scratch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    /// No Bluetooth radio is present.
    #[error("Bluetooth radio not present")]
    RadioUnavailable,

    /// The radio exists but is switched off.
    #[error("Bluetooth radio is disabled")]
    RadioDisabled,

    /// The radio cannot advertise as a peripheral.
    #[error("BLE multi-advertisement not supported")]
    AdvertisingUnsupported,

    /// The GATT server could not be opened or the service not registered.
    #[error("GATT server setup failed: {reason}")]
    GattServer {
        /// Driver-provided description.
        reason: String,
    },

    /// The platform refused to start advertising.
    #[error("Advertising failed to start: {reason}")]
    Advertising {
        /// Driver-provided description.
        reason: String,
    },
}

/// Failure reported by a platform BLE stack call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct DriverError {
    /// The driver operation that failed (e.g. `"notify"`).
    pub operation: String,
    /// Platform-provided description.
    pub message: String,
}

impl DriverError {
    /// Create a new driver error.
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
