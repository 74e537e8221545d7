//! Heart Rate Service peripheral engine.
//!
//! The engine owns the single GATT server and advertiser, tracks which
//! central (if any) enabled notifications, and keeps the known-device store
//! up to date. Platform callbacks arrive as [`PeripheralEvent`]s and are
//! dispatched on a background task while the server is open.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::ble::advertising::{AdvertisingConfig, AdvertisingState};
use crate::ble::device::DeviceIdentifier;
use crate::ble::driver::{
    BondState, CharacteristicReadRequest, DescriptorReadRequest, DescriptorWriteRequest,
    GattResponse, GattStatus, LinkState, PeripheralDriver, PeripheralEvent,
};
use crate::ble::gatt::{heart_rate_service, ServiceDefinition};
use crate::ble::uuids::{
    cccd_enables_notifications, CLIENT_CHARACTERISTIC_CONFIGURATION_UUID,
    DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE, HEART_RATE_MEASUREMENT_UUID,
};
use crate::config::PeripheralConfig;
use crate::error::{Result, StartError};
use crate::handle::CallbackHandle;
use crate::protocol::heart_rate::encode;
use crate::storage::KnownDeviceStore;

/// Change in connection or subscription state, published by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// A central connected (not yet subscribed).
    DeviceConnected(DeviceIdentifier),
    /// A central disconnected.
    DeviceDisconnected(DeviceIdentifier),
    /// A central enabled notifications and is now the subscriber.
    Subscribed(DeviceIdentifier),
    /// The subscriber disabled notifications, disconnected or was forgotten.
    Unsubscribed(DeviceIdentifier),
}

/// Sink for heart-rate samples with an on/off switch.
///
/// This is the surface the auto-pause controller drives.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Bring advertising up. Succeeds immediately if already advertising.
    async fn start(&self) -> std::result::Result<(), StartError>;

    /// Tear advertising down. Never fails.
    async fn stop(&self);

    /// Deliver one heart-rate sample to the subscriber, if any.
    async fn notify(&self, bpm: u8);
}

/// State shared with the event dispatcher task.
struct EngineCore {
    driver: Arc<dyn PeripheralDriver>,
    service: ServiceDefinition,
    state: RwLock<AdvertisingState>,
    subscriber: RwLock<Option<DeviceIdentifier>>,
    known_devices: Mutex<KnownDeviceStore>,
    events_tx: broadcast::Sender<SubscriptionEvent>,
}

impl EngineCore {
    fn state(&self) -> AdvertisingState {
        *self.state.read()
    }

    fn set_state(&self, state: AdvertisingState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!("Advertising state: {} -> {}", previous, state);
        }
    }

    fn subscriber(&self) -> Option<DeviceIdentifier> {
        self.subscriber.read().clone()
    }

    fn emit(&self, event: SubscriptionEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Clear the subscriber, optionally only if it is `device`.
    fn clear_subscriber(&self, device: Option<&DeviceIdentifier>) {
        let cleared = {
            let mut subscriber = self.subscriber.write();
            match (subscriber.as_ref(), device) {
                (Some(current), Some(target)) if current != target => None,
                _ => subscriber.take(),
            }
        };

        if let Some(device) = cleared {
            info!("Subscriber {} cleared", device);
            self.emit(SubscriptionEvent::Unsubscribed(device));
        }
    }

    async fn handle_event(&self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::ConnectionStateChanged { device, state } => {
                self.handle_connection_state_changed(device, state)
            }
            PeripheralEvent::DescriptorWrite(request) => {
                self.handle_descriptor_write(request).await
            }
            PeripheralEvent::CharacteristicRead(request) => {
                self.handle_characteristic_read(request).await
            }
            PeripheralEvent::DescriptorRead(request) => self.handle_descriptor_read(request).await,
            PeripheralEvent::AdvertisingStarted => info!("Advertising started"),
            PeripheralEvent::AdvertisingFailed { reason } => {
                warn!("Platform reported advertising failure: {}", reason)
            }
        }
    }

    fn handle_connection_state_changed(&self, device: DeviceIdentifier, state: LinkState) {
        debug!("Connection state changed: {} -> {}", device, state);

        match state {
            LinkState::Connected => {
                // Connected is not subscribed; that waits for a CCCD write.
                match self.known_devices.lock().add(device.clone()) {
                    Ok(true) => info!("New known device: {}", device),
                    Ok(false) => {}
                    Err(e) => warn!("Failed to persist known device {}: {}", device, e),
                }
                self.emit(SubscriptionEvent::DeviceConnected(device));
            }
            LinkState::Disconnected => {
                self.clear_subscriber(Some(&device));
                self.emit(SubscriptionEvent::DeviceDisconnected(device));
            }
        }
    }

    async fn handle_descriptor_write(&self, request: DescriptorWriteRequest) {
        let is_cccd = request.characteristic == HEART_RATE_MEASUREMENT_UUID
            && request.descriptor == CLIENT_CHARACTERISTIC_CONFIGURATION_UUID;

        if request.response_needed {
            let status = if is_cccd {
                GattStatus::Success
            } else {
                GattStatus::RequestNotSupported
            };
            // Prepared writes expect the written value echoed back.
            let value = request.prepared_write.then(|| request.value.clone());
            self.respond(GattResponse {
                device: request.device.clone(),
                request_id: request.request_id,
                status,
                offset: request.offset,
                value,
            })
            .await;
        }

        if !is_cccd {
            debug!(
                "Ignoring write to descriptor {} of {} from {}",
                request.descriptor, request.characteristic, request.device
            );
            return;
        }

        if cccd_enables_notifications(&request.value) {
            // The lifecycle check and the update happen under one subscriber
            // lock; `stop()` and failed starts leave the running states
            // before they clear the subscriber.
            let previous = {
                let mut subscriber = self.subscriber.write();
                let state = self.state();
                if !matches!(
                    state,
                    AdvertisingState::Starting | AdvertisingState::Advertising
                ) {
                    debug!(
                        "Ignoring notification enable from {} while {}",
                        request.device, state
                    );
                    return;
                }
                subscriber.replace(request.device.clone())
            };

            if previous.as_ref() == Some(&request.device) {
                return;
            }
            if let Some(previous) = previous {
                info!("Subscriber {} replaced by {}", previous, request.device);
                self.emit(SubscriptionEvent::Unsubscribed(previous));
            }
            info!("Notifications enabled by {}", request.device);
            self.emit(SubscriptionEvent::Subscribed(request.device));
        } else {
            self.clear_subscriber(Some(&request.device));
        }
    }

    async fn handle_characteristic_read(&self, request: CharacteristicReadRequest) {
        let (status, value) = match self.service.characteristic(&request.characteristic) {
            Some(characteristic) => match &characteristic.value {
                Some(value) => read_at(value, request.offset),
                None => (GattStatus::ReadNotPermitted, None),
            },
            None => (GattStatus::RequestNotSupported, None),
        };

        trace!(
            "Read of {} by {}: {:?}",
            request.characteristic,
            request.device,
            status
        );

        self.respond(GattResponse {
            device: request.device,
            request_id: request.request_id,
            status,
            offset: request.offset,
            value,
        })
        .await;
    }

    async fn handle_descriptor_read(&self, request: DescriptorReadRequest) {
        let is_cccd = request.characteristic == HEART_RATE_MEASUREMENT_UUID
            && request.descriptor == CLIENT_CHARACTERISTIC_CONFIGURATION_UUID;

        let (status, value) = if is_cccd {
            let current = if self.subscriber().as_ref() == Some(&request.device) {
                ENABLE_NOTIFICATION_VALUE
            } else {
                DISABLE_NOTIFICATION_VALUE
            };
            read_at(&current, request.offset)
        } else {
            (GattStatus::RequestNotSupported, None)
        };

        self.respond(GattResponse {
            device: request.device,
            request_id: request.request_id,
            status,
            offset: request.offset,
            value,
        })
        .await;
    }

    async fn respond(&self, response: GattResponse) {
        let device = response.device.clone();
        if let Err(e) = self.driver.send_response(response).await {
            warn!("Failed to send GATT response to {}: {}", device, e);
        }
    }

    /// Drop a device's connection and, if asked, its bond.
    ///
    /// Failures are logged; each device is handled independently.
    async fn release_device(&self, device: &DeviceIdentifier, also_unbond: bool) {
        if let Err(e) = self.driver.cancel_connection(device).await {
            warn!("Failed to cancel connection to {}: {}", device, e);
        }

        if !also_unbond {
            return;
        }

        match self.driver.bond_state(device) {
            BondState::Bonded => match self.driver.remove_bond(device).await {
                Ok(()) => info!("Removed bond with {}", device),
                Err(e) => warn!("Failed to remove bond with {}: {}", device, e),
            },
            state => debug!("{} is not bonded ({:?}), skipping unbond", device, state),
        }
    }
}

/// Serve a constant value honouring the read offset.
fn read_at(value: &[u8], offset: u16) -> (GattStatus, Option<Bytes>) {
    let offset = usize::from(offset);
    if offset > value.len() {
        return (GattStatus::InvalidOffset, None);
    }
    (
        GattStatus::Success,
        Some(Bytes::copy_from_slice(&value[offset..])),
    )
}

/// BLE Heart Rate Service peripheral.
///
/// `start`/`stop` are serialized by an internal async mutex, so pause-driven
/// and host-driven calls can interleave freely. The subscriber and lifecycle
/// state are behind short-lived locks that are never held across an await.
pub struct PeripheralEngine {
    core: Arc<EngineCore>,
    config: PeripheralConfig,
    lifecycle: tokio::sync::Mutex<()>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    callback_counter: AtomicU64,
}

impl PeripheralEngine {
    /// Create an engine on top of a platform driver.
    ///
    /// The known-device store is opened from `config.known_devices_path`, or
    /// kept in memory when no path is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the known-device file exists but cannot be read.
    pub fn new(driver: Arc<dyn PeripheralDriver>, config: PeripheralConfig) -> Result<Self> {
        let store = match &config.known_devices_path {
            Some(path) => KnownDeviceStore::open(path)?,
            None => KnownDeviceStore::in_memory(),
        };
        Ok(Self::with_store(driver, config, store))
    }

    /// Create an engine with an already opened known-device store.
    pub fn with_store(
        driver: Arc<dyn PeripheralDriver>,
        config: PeripheralConfig,
        store: KnownDeviceStore,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(32);

        Self {
            core: Arc::new(EngineCore {
                driver,
                service: heart_rate_service(),
                state: RwLock::new(AdvertisingState::Stopped),
                subscriber: RwLock::new(None),
                known_devices: Mutex::new(store),
                events_tx,
            }),
            config,
            lifecycle: tokio::sync::Mutex::new(()),
            dispatcher: Mutex::new(None),
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Open the GATT server and start advertising.
    ///
    /// Calling this while already advertising returns `Ok(())` without
    /// touching the driver. Starting from `Failed` retries from scratch.
    ///
    /// # Errors
    ///
    /// Returns a [`StartError`] naming the failed precondition or driver
    /// step; the engine is left in `Failed`.
    pub async fn start(&self) -> std::result::Result<(), StartError> {
        let _guard = self.lifecycle.lock().await;

        if self.core.state().is_advertising() {
            debug!("Already advertising");
            return Ok(());
        }

        self.core.set_state(AdvertisingState::Starting);

        match self.bring_up().await {
            Ok(()) => {
                self.core.set_state(AdvertisingState::Advertising);
                info!("Advertising Heart Rate Service as {:?}", self.config.device_name);
                Ok(())
            }
            Err(e) => {
                self.core.set_state(AdvertisingState::Failed);
                // A central may have enabled notifications while the server
                // was briefly open.
                self.core.clear_subscriber(None);
                error!("Failed to start peripheral: {}", e);
                Err(e)
            }
        }
    }

    async fn bring_up(&self) -> std::result::Result<(), StartError> {
        let driver = &self.core.driver;

        let radio = driver.radio_status();
        if !radio.present {
            return Err(StartError::RadioUnavailable);
        }
        if !radio.enabled {
            return Err(StartError::RadioDisabled);
        }
        if !radio.multiple_advertisement_supported {
            return Err(StartError::AdvertisingUnsupported);
        }

        if let Err(e) = driver.set_device_name(&self.config.device_name).await {
            warn!("Could not set device name: {}", e);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        driver
            .open_gatt_server(&self.core.service, events_tx)
            .await
            .map_err(|e| StartError::GattServer {
                reason: e.to_string(),
            })?;
        self.spawn_dispatcher(events_rx);

        if let Err(e) = driver.start_advertising(&self.advertising_config()).await {
            self.abort_dispatcher();
            if let Err(close_err) = driver.close_gatt_server().await {
                warn!("Failed to close GATT server after advertising failure: {}", close_err);
            }
            return Err(StartError::Advertising {
                reason: e.to_string(),
            });
        }

        Ok(())
    }

    /// Stop advertising and close the GATT server.
    ///
    /// Driver failures are logged, never returned. Always ends in `Stopped`
    /// with no subscriber.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        let driver = &self.core.driver;

        if let Err(e) = driver.stop_advertising().await {
            warn!("Failed to stop advertising: {}", e);
        }
        if let Err(e) = driver.close_gatt_server().await {
            warn!("Failed to close GATT server: {}", e);
        }

        self.abort_dispatcher();

        let previous = self.core.state();
        self.core.set_state(AdvertisingState::Stopped);
        self.core.clear_subscriber(None);

        if previous != AdvertisingState::Stopped {
            info!("Peripheral stopped");
        }
    }

    /// Send one heart-rate sample to the subscriber.
    ///
    /// No-op without a subscriber or while not advertising. Send failures
    /// are logged; the next sample supersedes a dropped one.
    pub async fn notify(&self, bpm: u8) {
        let Some(device) = self.core.subscriber() else {
            trace!("No subscriber, dropping {} bpm", bpm);
            return;
        };

        if !self.core.state().is_advertising() {
            trace!("Not advertising, dropping {} bpm", bpm);
            return;
        }

        let payload = Bytes::copy_from_slice(&encode(bpm));
        match self
            .core
            .driver
            .notify_characteristic_changed(&device, HEART_RATE_MEASUREMENT_UUID, payload, false)
            .await
        {
            Ok(()) => trace!("Notified {} bpm to {}", bpm, device),
            Err(e) => warn!("Failed to notify {}: {}", device, e),
        }
    }

    /// Forget every known device.
    ///
    /// Each device's connection is cancelled and, with `also_unbond`, its
    /// bond removed if bonded. Afterwards the subscriber and the known set
    /// are cleared and the empty set is persisted.
    pub async fn forget_all(&self, also_unbond: bool) {
        let mut targets = self.core.known_devices.lock().devices();
        if let Some(subscriber) = self.core.subscriber() {
            targets.insert(subscriber);
        }

        self.core.clear_subscriber(None);

        for device in &targets {
            self.core.release_device(device, also_unbond).await;
        }

        if let Err(e) = self.core.known_devices.lock().clear() {
            warn!("Failed to persist cleared known devices: {}", e);
        }

        info!("Forgot {} device(s)", targets.len());
    }

    /// Forget one device by address. Empty or malformed addresses are ignored.
    pub async fn forget(&self, address: &str, also_unbond: bool) {
        match DeviceIdentifier::parse(address) {
            Some(device) => self.forget_device(&device, also_unbond).await,
            None => debug!("Ignoring forget for invalid address {:?}", address),
        }
    }

    /// Forget one device.
    pub async fn forget_device(&self, device: &DeviceIdentifier, also_unbond: bool) {
        self.core.clear_subscriber(Some(device));
        self.core.release_device(device, also_unbond).await;

        match self.core.known_devices.lock().remove(device) {
            Ok(true) => info!("Forgot device {}", device),
            Ok(false) => debug!("Device {} was not known", device),
            Err(e) => warn!("Failed to persist removal of {}: {}", device, e),
        }
    }

    /// Devices that have connected and not been forgotten.
    pub fn known_devices(&self) -> BTreeSet<DeviceIdentifier> {
        self.core.known_devices.lock().devices()
    }

    /// Current advertising lifecycle state.
    pub fn state(&self) -> AdvertisingState {
        self.core.state()
    }

    /// Check if advertising.
    pub fn is_advertising(&self) -> bool {
        self.core.state().is_advertising()
    }

    /// The central currently receiving notifications.
    pub fn subscriber(&self) -> Option<DeviceIdentifier> {
        self.core.subscriber()
    }

    /// The service tree registered with the driver.
    pub fn service(&self) -> &ServiceDefinition {
        &self.core.service
    }

    /// Engine configuration.
    pub fn config(&self) -> &PeripheralConfig {
        &self.config
    }

    /// Process one platform callback.
    ///
    /// The dispatcher task calls this for every event the driver reports;
    /// it is public so that hosts without a channel-based driver can feed
    /// callbacks directly.
    pub async fn handle_event(&self, event: PeripheralEvent) {
        self.core.handle_event(event).await;
    }

    /// Subscribe to connection and subscription changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.core.events_tx.subscribe()
    }

    /// Register a callback for connection and subscription changes.
    pub fn on_subscription_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(SubscriptionEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.core.events_tx.subscribe();

        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                callback(event);
            }
        });

        CallbackHandle::for_task(callback_id, handle)
    }

    fn advertising_config(&self) -> AdvertisingConfig {
        let settings = self.config.advertising;
        AdvertisingConfig {
            service_uuids: vec![self.core.service.uuid],
            local_name: settings
                .include_device_name
                .then(|| self.config.device_name.clone()),
            settings,
        }
    }

    fn spawn_dispatcher(&self, mut events_rx: mpsc::UnboundedReceiver<PeripheralEvent>) {
        let core = self.core.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                core.handle_event(event).await;
            }
            debug!("Peripheral event dispatcher ended");
        });

        if let Some(previous) = self.dispatcher.lock().replace(handle) {
            previous.abort();
        }
    }

    fn abort_dispatcher(&self) {
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Broadcaster for PeripheralEngine {
    async fn start(&self) -> std::result::Result<(), StartError> {
        PeripheralEngine::start(self).await
    }

    async fn stop(&self) {
        PeripheralEngine::stop(self).await
    }

    async fn notify(&self, bpm: u8) {
        PeripheralEngine::notify(self, bpm).await
    }
}

impl Drop for PeripheralEngine {
    fn drop(&mut self) {
        self.abort_dispatcher();
    }
}
