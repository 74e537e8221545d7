//! Minimal Heart Rate Service central.
//!
//! Used to validate a running peripheral from another machine: scan for
//! 0x180D, connect, enable notifications on 0x2A37 and stream decoded
//! measurements.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::uuids::{
    BODY_SENSOR_LOCATION_UUID, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
};
use crate::error::{Error, Result};
use crate::protocol::heart_rate::HeartRateMeasurement;

/// How long a connection attempt may take.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the client is in its connect, discover and subscribe sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientState {
    #[default]
    Idle,
    /// Link up in progress, services not yet checked.
    Connecting,
    /// Heart Rate Service found; measurements not enabled yet.
    Ready,
    /// Measurement notifications enabled and being decoded.
    Streaming,
}

impl ClientState {
    /// Linked to a peripheral that exposes the Heart Rate Service.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready | Self::Streaming)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// A peripheral advertising the Heart Rate Service.
#[derive(Debug, Clone)]
pub struct DiscoveredSensor {
    /// Platform peripheral identifier.
    pub identifier: String,
    /// Peripheral handle.
    pub peripheral: Peripheral,
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// Decode a notification if it belongs to the measurement characteristic.
///
/// Returns `None` for notifications from other characteristics.
pub fn decode_notification(uuid: &Uuid, value: &[u8]) -> Option<Result<HeartRateMeasurement>> {
    if *uuid != HEART_RATE_MEASUREMENT_UUID {
        return None;
    }
    Some(HeartRateMeasurement::parse(value))
}

/// Get the first Bluetooth adapter.
///
/// # Errors
///
/// Returns [`Error::BluetoothUnavailable`] if there is no adapter.
pub async fn default_adapter() -> Result<Adapter> {
    let manager = Manager::new()
        .await
        .map_err(|_e| Error::BluetoothUnavailable)?;

    let adapter = manager
        .adapters()
        .await
        .map_err(Error::Bluetooth)?
        .into_iter()
        .next()
        .ok_or(Error::BluetoothUnavailable)?;

    info!(
        "Using Bluetooth adapter: {:?}",
        adapter.adapter_info().await.ok()
    );

    Ok(adapter)
}

/// Scan for Heart Rate Service peripherals for `duration`.
pub async fn scan(adapter: &Adapter, duration: Duration) -> Result<Vec<DiscoveredSensor>> {
    info!("Scanning {:?} for heart rate sensors", duration);

    adapter
        .start_scan(ScanFilter {
            services: vec![HEART_RATE_SERVICE_UUID],
        })
        .await
        .map_err(Error::Bluetooth)?;

    let mut events = adapter.events().await.map_err(Error::Bluetooth)?;
    let mut found: HashMap<String, DiscoveredSensor> = HashMap::new();

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            Some(event) = events.next() => {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ServicesAdvertisement { id, .. } => id,
                    _ => continue,
                };

                if let Some(sensor) = inspect_peripheral(adapter, id).await {
                    if !found.contains_key(&sensor.identifier) {
                        debug!("Found heart rate sensor {} ({:?})", sensor.identifier, sensor.local_name);
                    }
                    found.insert(sensor.identifier.clone(), sensor);
                }
            }
            _ = &mut deadline => break,
        }
    }

    if let Err(e) = adapter.stop_scan().await {
        warn!("Failed to stop scan: {}", e);
    }

    Ok(found.into_values().collect())
}

async fn inspect_peripheral(adapter: &Adapter, id: PeripheralId) -> Option<DiscoveredSensor> {
    let peripheral = match adapter.peripheral(&id).await {
        Ok(p) => p,
        Err(e) => {
            trace!("Failed to get peripheral: {}", e);
            return None;
        }
    };

    let properties = peripheral.properties().await.ok().flatten()?;
    if !properties.services.contains(&HEART_RATE_SERVICE_UUID) {
        return None;
    }

    Some(DiscoveredSensor {
        identifier: id.to_string(),
        peripheral,
        local_name: properties.local_name,
        rssi: properties.rssi,
    })
}

/// Client for one Heart Rate Service peripheral.
pub struct HeartRateClient {
    peripheral: Peripheral,
    state: Arc<RwLock<ClientState>>,
    measurement_tx: broadcast::Sender<HeartRateMeasurement>,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
}

impl HeartRateClient {
    /// Wrap a peripheral handle.
    pub fn new(peripheral: Peripheral) -> Self {
        let (measurement_tx, _) = broadcast::channel(64);

        Self {
            peripheral,
            state: Arc::new(RwLock::new(ClientState::Idle)),
            measurement_tx,
            listener_handle: Mutex::new(None),
        }
    }

    /// Scan and wrap the strongest Heart Rate Service peripheral.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeripheralNotFound`] if nothing was found in time.
    pub async fn find_nearest(adapter: &Adapter, duration: Duration) -> Result<Self> {
        let sensor = scan(adapter, duration)
            .await?
            .into_iter()
            .max_by_key(|s| s.rssi.unwrap_or(i16::MIN))
            .ok_or_else(|| Error::PeripheralNotFound {
                identifier: HEART_RATE_SERVICE_UUID.to_string(),
            })?;

        info!("Selected heart rate sensor {}", sensor.identifier);
        Ok(Self::new(sensor.peripheral))
    }

    /// Current client state.
    pub fn state(&self) -> ClientState {
        *self.state.read()
    }

    /// Connected with the Heart Rate Service discovered.
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Peripheral handle.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    /// Connect and discover services.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceNotFound`] if the peripheral does not expose
    /// the Heart Rate Service.
    pub async fn connect(&self) -> Result<()> {
        let current = self.state();
        if current.is_ready() {
            debug!("Already connected");
            return Ok(());
        }
        if current == ClientState::Connecting {
            return Err(Error::ConnectionFailed {
                reason: "Connection already in progress".to_string(),
            });
        }

        self.set_state(ClientState::Connecting);

        let result = async {
            tokio::time::timeout(CONNECT_TIMEOUT, self.peripheral.connect())
                .await
                .map_err(|_| Error::Timeout)?
                .map_err(Error::Bluetooth)?;
            self.peripheral
                .discover_services()
                .await
                .map_err(Error::Bluetooth)?;

            if !self
                .peripheral
                .services()
                .iter()
                .any(|s| s.uuid == HEART_RATE_SERVICE_UUID)
            {
                return Err(Error::ServiceNotFound {
                    uuid: HEART_RATE_SERVICE_UUID.to_string(),
                });
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                info!("Connected to heart rate sensor");
                self.set_state(ClientState::Ready);
                Ok(())
            }
            Err(e) => {
                warn!("Connection failed: {}", e);
                self.set_state(ClientState::Idle);
                Err(e)
            }
        }
    }

    /// Enable measurement notifications and start decoding them.
    pub async fn subscribe(&self) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::NotConnected);
        }

        let characteristic = self.characteristic(&HEART_RATE_MEASUREMENT_UUID)?;
        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(Error::Bluetooth)?;
        let measurement_tx = self.measurement_tx.clone();

        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                match decode_notification(&notification.uuid, &notification.value) {
                    Some(Ok(measurement)) => {
                        trace!("Heart rate: {} bpm", measurement.bpm);
                        let _ = measurement_tx.send(measurement);
                    }
                    Some(Err(e)) => warn!("Undecodable measurement: {}", e),
                    None => {}
                }
            }
            debug!("Measurement listener ended");
        });

        if let Some(previous) = self.listener_handle.lock().replace(handle) {
            previous.abort();
        }

        self.set_state(ClientState::Streaming);
        debug!("Subscribed to heart rate measurements");
        Ok(())
    }

    /// Read the Body Sensor Location byte.
    pub async fn read_body_sensor_location(&self) -> Result<u8> {
        if !self.is_ready() {
            return Err(Error::NotConnected);
        }

        let characteristic = self.characteristic(&BODY_SENSOR_LOCATION_UUID)?;
        let data = self
            .peripheral
            .read(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        data.first().copied().ok_or_else(|| Error::InvalidData {
            context: "Empty body sensor location".to_string(),
        })
    }

    /// Receive decoded measurements.
    pub fn measurements(&self) -> broadcast::Receiver<HeartRateMeasurement> {
        self.measurement_tx.subscribe()
    }

    /// Disconnect from the peripheral.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(handle) = self.listener_handle.lock().take() {
            handle.abort();
        }

        if self.state() == ClientState::Idle {
            return Ok(());
        }

        let result = self.peripheral.disconnect().await.map_err(Error::Bluetooth);
        self.set_state(ClientState::Idle);

        if result.is_ok() {
            info!("Disconnected from heart rate sensor");
        }
        result
    }

    fn characteristic(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == *uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    fn set_state(&self, new_state: ClientState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        if old_state != new_state {
            debug!("Client {} -> {}", old_state, new_state);
        }
    }
}

impl Drop for HeartRateClient {
    fn drop(&mut self) {
        if let Some(handle) = self.listener_handle.lock().take() {
            handle.abort();
        }
    }
}
