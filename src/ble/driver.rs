//! Platform BLE stack seam.
//!
//! The engine never talks to a concrete Bluetooth API. A platform backend
//! implements [`PeripheralDriver`] for the outgoing primitives and reports
//! incoming callbacks by sending [`PeripheralEvent`]s into the [`EventSink`]
//! it receives when the GATT server is opened.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ble::advertising::AdvertisingConfig;
use crate::ble::device::DeviceIdentifier;
use crate::ble::gatt::ServiceDefinition;
use crate::error::DriverError;

/// Result type for driver calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Channel through which a driver reports platform callbacks.
///
/// Unbounded so that a platform callback thread never blocks on send.
pub type EventSink = mpsc::UnboundedSender<PeripheralEvent>;

/// What the local radio can do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioStatus {
    /// A Bluetooth radio exists.
    pub present: bool,
    /// The radio is switched on.
    pub enabled: bool,
    /// The radio supports peripheral-mode advertising.
    pub multiple_advertisement_supported: bool,
}

impl RadioStatus {
    /// A radio that satisfies every precondition.
    pub const READY: Self = Self {
        present: true,
        enabled: true,
        multiple_advertisement_supported: true,
    };
}

/// Link-layer connection state of a remote central.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// The central connected to our GATT server.
    Connected,
    /// The central went away.
    Disconnected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// OS-level bond (pairing) state of a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BondState {
    /// Not bonded.
    #[default]
    None,
    /// Pairing in progress.
    Bonding,
    /// Bonded.
    Bonded,
}

/// ATT status sent back in a GATT response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GattStatus {
    /// Request completed.
    Success,
    /// Offset beyond the attribute value.
    InvalidOffset,
    /// Attribute cannot be read.
    ReadNotPermitted,
    /// Attribute cannot be written.
    WriteNotPermitted,
    /// Request not supported for this attribute.
    RequestNotSupported,
}

impl GattStatus {
    /// ATT error code (0x00 for success).
    pub fn code(&self) -> u8 {
        match self {
            Self::Success => 0x00,
            Self::ReadNotPermitted => 0x02,
            Self::WriteNotPermitted => 0x03,
            Self::RequestNotSupported => 0x06,
            Self::InvalidOffset => 0x07,
        }
    }
}

/// A central wrote a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorWriteRequest {
    /// The writing central.
    pub device: DeviceIdentifier,
    /// Platform request id, echoed in the response.
    pub request_id: u32,
    /// Characteristic owning the descriptor.
    pub characteristic: Uuid,
    /// Descriptor that was written.
    pub descriptor: Uuid,
    /// Part of a queued (prepared) write.
    pub prepared_write: bool,
    /// The central waits for a response.
    pub response_needed: bool,
    /// Write offset.
    pub offset: u16,
    /// Written bytes.
    pub value: Bytes,
}

/// A central read a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicReadRequest {
    /// The reading central.
    pub device: DeviceIdentifier,
    /// Platform request id, echoed in the response.
    pub request_id: u32,
    /// Characteristic being read.
    pub characteristic: Uuid,
    /// Read offset.
    pub offset: u16,
}

/// A central read a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorReadRequest {
    /// The reading central.
    pub device: DeviceIdentifier,
    /// Platform request id, echoed in the response.
    pub request_id: u32,
    /// Characteristic owning the descriptor.
    pub characteristic: Uuid,
    /// Descriptor being read.
    pub descriptor: Uuid,
    /// Read offset.
    pub offset: u16,
}

/// Response to a read or write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattResponse {
    /// Central the response goes to.
    pub device: DeviceIdentifier,
    /// Request id being answered.
    pub request_id: u32,
    /// Outcome.
    pub status: GattStatus,
    /// Offset echoed back.
    pub offset: u16,
    /// Value for reads.
    pub value: Option<Bytes>,
}

/// Callback reported by the platform BLE stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    /// A central connected or disconnected.
    ConnectionStateChanged {
        /// The remote central.
        device: DeviceIdentifier,
        /// Its new state.
        state: LinkState,
    },
    /// A central wrote a descriptor.
    DescriptorWrite(DescriptorWriteRequest),
    /// A central read a characteristic.
    CharacteristicRead(CharacteristicReadRequest),
    /// A central read a descriptor.
    DescriptorRead(DescriptorReadRequest),
    /// The platform confirmed advertising is on air.
    AdvertisingStarted,
    /// The platform reported an advertising failure.
    AdvertisingFailed {
        /// Platform-provided description.
        reason: String,
    },
}

/// Outgoing primitives of a platform BLE stack in the peripheral role.
///
/// Calls must complete in bounded time. Failures are reported as
/// [`DriverError`]; a driver must never panic into the engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeripheralDriver: Send + Sync {
    /// Current radio capabilities.
    fn radio_status(&self) -> RadioStatus;

    /// Set the adapter name shown in scan responses.
    async fn set_device_name(&self, name: &str) -> DriverResult<()>;

    /// Open the GATT server and register `service`.
    ///
    /// Callbacks for this server are sent to `events` until it is closed.
    async fn open_gatt_server(
        &self,
        service: &ServiceDefinition,
        events: EventSink,
    ) -> DriverResult<()>;

    /// Close the GATT server, dropping every server-side connection.
    async fn close_gatt_server(&self) -> DriverResult<()>;

    /// Start advertising. Resolves once the platform reports the outcome.
    async fn start_advertising(&self, config: &AdvertisingConfig) -> DriverResult<()>;

    /// Stop advertising.
    async fn stop_advertising(&self) -> DriverResult<()>;

    /// Push a characteristic value to one central.
    ///
    /// `confirm == false` sends a notification (no acknowledgment).
    async fn notify_characteristic_changed(
        &self,
        device: &DeviceIdentifier,
        characteristic: Uuid,
        value: Bytes,
        confirm: bool,
    ) -> DriverResult<()>;

    /// Answer a read or write request.
    async fn send_response(&self, response: GattResponse) -> DriverResult<()>;

    /// Drop a server-side connection.
    async fn cancel_connection(&self, device: &DeviceIdentifier) -> DriverResult<()>;

    /// OS bond state of a device.
    fn bond_state(&self, device: &DeviceIdentifier) -> BondState;

    /// Ask the OS to remove the bond with a device.
    async fn remove_bond(&self, device: &DeviceIdentifier) -> DriverResult<()>;
}
