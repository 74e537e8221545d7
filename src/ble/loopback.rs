//! In-memory platform BLE stack.
//!
//! [`LoopbackDriver`] records every call the engine makes and lets a test or
//! demo play the part of a remote central by injecting platform callbacks.
//! Nothing goes over the air.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::ble::advertising::AdvertisingConfig;
use crate::ble::device::DeviceIdentifier;
use crate::ble::driver::{
    BondState, CharacteristicReadRequest, DescriptorReadRequest, DescriptorWriteRequest,
    DriverResult, EventSink, GattResponse, LinkState, PeripheralDriver, PeripheralEvent,
    RadioStatus,
};
use crate::ble::gatt::ServiceDefinition;
use crate::ble::uuids::{
    BODY_SENSOR_LOCATION_UUID, CLIENT_CHARACTERISTIC_CONFIGURATION_UUID,
    DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE, HEART_RATE_MEASUREMENT_UUID,
};
use crate::error::DriverError;

/// Driver operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    /// `open_gatt_server`.
    OpenGattServer,
    /// `start_advertising`.
    StartAdvertising,
    /// `notify_characteristic_changed`.
    Notify,
    /// `send_response`.
    SendResponse,
    /// `cancel_connection`.
    CancelConnection,
    /// `remove_bond`.
    RemoveBond,
}

/// A notification the engine pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    /// Target central.
    pub device: DeviceIdentifier,
    /// Characteristic that changed.
    pub characteristic: Uuid,
    /// Payload.
    pub value: Bytes,
    /// Whether an indication was requested.
    pub confirm: bool,
}

#[derive(Debug)]
struct LoopbackState {
    radio: RadioStatus,
    device_name: Option<String>,
    service: Option<ServiceDefinition>,
    sink: Option<EventSink>,
    advertising: Option<AdvertisingConfig>,
    open_count: usize,
    notifications: Vec<SentNotification>,
    responses: Vec<GattResponse>,
    cancelled: Vec<DeviceIdentifier>,
    unbonded: Vec<DeviceIdentifier>,
    bonds: HashMap<DeviceIdentifier, BondState>,
    failures: HashSet<FailurePoint>,
    next_request_id: u32,
}

/// Loopback implementation of [`PeripheralDriver`].
#[derive(Debug)]
pub struct LoopbackDriver {
    state: Mutex<LoopbackState>,
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDriver {
    /// A driver with a ready radio.
    pub fn new() -> Self {
        Self::with_radio(RadioStatus::READY)
    }

    /// A driver reporting the given radio status.
    pub fn with_radio(radio: RadioStatus) -> Self {
        Self {
            state: Mutex::new(LoopbackState {
                radio,
                device_name: None,
                service: None,
                sink: None,
                advertising: None,
                open_count: 0,
                notifications: Vec::new(),
                responses: Vec::new(),
                cancelled: Vec::new(),
                unbonded: Vec::new(),
                bonds: HashMap::new(),
                failures: HashSet::new(),
                next_request_id: 1,
            }),
        }
    }

    /// Change the reported radio status.
    pub fn set_radio(&self, radio: RadioStatus) {
        self.state.lock().radio = radio;
    }

    /// Make an operation fail until [`heal`](Self::heal) is called.
    pub fn fail(&self, point: FailurePoint) {
        self.state.lock().failures.insert(point);
    }

    /// Let an operation succeed again.
    pub fn heal(&self, point: FailurePoint) {
        self.state.lock().failures.remove(&point);
    }

    /// Set the OS bond state reported for a device.
    pub fn set_bond_state(&self, device: &DeviceIdentifier, state: BondState) {
        self.state.lock().bonds.insert(device.clone(), state);
    }

    /// Whether the GATT server is open.
    pub fn is_server_open(&self) -> bool {
        self.state.lock().service.is_some()
    }

    /// Whether advertising is on.
    pub fn is_advertising(&self) -> bool {
        self.state.lock().advertising.is_some()
    }

    /// How many times the GATT server was opened.
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Name last set on the adapter.
    pub fn device_name(&self) -> Option<String> {
        self.state.lock().device_name.clone()
    }

    /// Service registered with the open GATT server.
    pub fn registered_service(&self) -> Option<ServiceDefinition> {
        self.state.lock().service.clone()
    }

    /// Current advertising configuration.
    pub fn advertising_config(&self) -> Option<AdvertisingConfig> {
        self.state.lock().advertising.clone()
    }

    /// Notifications sent so far.
    pub fn notifications(&self) -> Vec<SentNotification> {
        self.state.lock().notifications.clone()
    }

    /// Drain the recorded notifications.
    pub fn take_notifications(&self) -> Vec<SentNotification> {
        std::mem::take(&mut self.state.lock().notifications)
    }

    /// Responses sent so far.
    pub fn responses(&self) -> Vec<GattResponse> {
        self.state.lock().responses.clone()
    }

    /// Devices whose connection was cancelled.
    pub fn cancelled(&self) -> Vec<DeviceIdentifier> {
        self.state.lock().cancelled.clone()
    }

    /// Devices whose bond was removed.
    pub fn unbonded(&self) -> Vec<DeviceIdentifier> {
        self.state.lock().unbonded.clone()
    }

    /// Deliver a platform callback to the engine.
    ///
    /// Returns `false` if no GATT server is open to receive it.
    pub fn emit(&self, event: PeripheralEvent) -> bool {
        let sink = self.state.lock().sink.clone();
        match sink {
            Some(sink) => sink.send(event).is_ok(),
            None => {
                debug!("Loopback: no GATT server open, dropping {:?}", event);
                false
            }
        }
    }

    /// Simulate a central connecting.
    pub fn connect(&self, device: &DeviceIdentifier) -> bool {
        self.emit(PeripheralEvent::ConnectionStateChanged {
            device: device.clone(),
            state: LinkState::Connected,
        })
    }

    /// Simulate a central disconnecting.
    pub fn disconnect(&self, device: &DeviceIdentifier) -> bool {
        self.emit(PeripheralEvent::ConnectionStateChanged {
            device: device.clone(),
            state: LinkState::Disconnected,
        })
    }

    /// Simulate a central writing the enable pattern to the measurement CCCD.
    pub fn enable_notifications(&self, device: &DeviceIdentifier) -> bool {
        self.write_cccd(device, ENABLE_NOTIFICATION_VALUE)
    }

    /// Simulate a central writing the disable pattern to the measurement CCCD.
    pub fn disable_notifications(&self, device: &DeviceIdentifier) -> bool {
        self.write_cccd(device, DISABLE_NOTIFICATION_VALUE)
    }

    /// Simulate a central reading Body Sensor Location.
    pub fn read_body_sensor_location(&self, device: &DeviceIdentifier) -> bool {
        let request_id = self.next_request_id();
        self.emit(PeripheralEvent::CharacteristicRead(CharacteristicReadRequest {
            device: device.clone(),
            request_id,
            characteristic: BODY_SENSOR_LOCATION_UUID,
            offset: 0,
        }))
    }

    /// Simulate a central reading the measurement CCCD.
    pub fn read_cccd(&self, device: &DeviceIdentifier) -> bool {
        let request_id = self.next_request_id();
        self.emit(PeripheralEvent::DescriptorRead(DescriptorReadRequest {
            device: device.clone(),
            request_id,
            characteristic: HEART_RATE_MEASUREMENT_UUID,
            descriptor: CLIENT_CHARACTERISTIC_CONFIGURATION_UUID,
            offset: 0,
        }))
    }

    fn write_cccd(&self, device: &DeviceIdentifier, value: [u8; 2]) -> bool {
        let request_id = self.next_request_id();
        self.emit(PeripheralEvent::DescriptorWrite(DescriptorWriteRequest {
            device: device.clone(),
            request_id,
            characteristic: HEART_RATE_MEASUREMENT_UUID,
            descriptor: CLIENT_CHARACTERISTIC_CONFIGURATION_UUID,
            prepared_write: false,
            response_needed: true,
            offset: 0,
            value: Bytes::copy_from_slice(&value),
        }))
    }

    fn next_request_id(&self) -> u32 {
        let mut state = self.state.lock();
        let id = state.next_request_id;
        state.next_request_id = state.next_request_id.wrapping_add(1);
        id
    }

    fn check(&self, point: FailurePoint, operation: &str) -> DriverResult<()> {
        if self.state.lock().failures.contains(&point) {
            return Err(DriverError::new(operation, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl PeripheralDriver for LoopbackDriver {
    fn radio_status(&self) -> RadioStatus {
        self.state.lock().radio
    }

    async fn set_device_name(&self, name: &str) -> DriverResult<()> {
        self.state.lock().device_name = Some(name.to_string());
        Ok(())
    }

    async fn open_gatt_server(
        &self,
        service: &ServiceDefinition,
        events: EventSink,
    ) -> DriverResult<()> {
        self.check(FailurePoint::OpenGattServer, "open_gatt_server")?;

        let mut state = self.state.lock();
        state.service = Some(service.clone());
        state.sink = Some(events);
        state.open_count += 1;
        Ok(())
    }

    async fn close_gatt_server(&self) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.service = None;
        state.sink = None;
        Ok(())
    }

    async fn start_advertising(&self, config: &AdvertisingConfig) -> DriverResult<()> {
        self.check(FailurePoint::StartAdvertising, "start_advertising")?;

        self.state.lock().advertising = Some(config.clone());
        self.emit(PeripheralEvent::AdvertisingStarted);
        Ok(())
    }

    async fn stop_advertising(&self) -> DriverResult<()> {
        self.state.lock().advertising = None;
        Ok(())
    }

    async fn notify_characteristic_changed(
        &self,
        device: &DeviceIdentifier,
        characteristic: Uuid,
        value: Bytes,
        confirm: bool,
    ) -> DriverResult<()> {
        self.check(FailurePoint::Notify, "notify")?;

        self.state.lock().notifications.push(SentNotification {
            device: device.clone(),
            characteristic,
            value,
            confirm,
        });
        Ok(())
    }

    async fn send_response(&self, response: GattResponse) -> DriverResult<()> {
        self.check(FailurePoint::SendResponse, "send_response")?;

        self.state.lock().responses.push(response);
        Ok(())
    }

    async fn cancel_connection(&self, device: &DeviceIdentifier) -> DriverResult<()> {
        self.check(FailurePoint::CancelConnection, "cancel_connection")?;

        self.state.lock().cancelled.push(device.clone());
        Ok(())
    }

    fn bond_state(&self, device: &DeviceIdentifier) -> BondState {
        self.state
            .lock()
            .bonds
            .get(device)
            .copied()
            .unwrap_or_default()
    }

    async fn remove_bond(&self, device: &DeviceIdentifier) -> DriverResult<()> {
        self.check(FailurePoint::RemoveBond, "remove_bond")?;

        let mut state = self.state.lock();
        state.bonds.insert(device.clone(), BondState::None);
        state.unbonded.push(device.clone());
        Ok(())
    }
}
