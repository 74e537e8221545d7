//! End-to-end flows through the loopback driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;
use uuid::Uuid;

use hr_peripheral::ble::advertising::AdvertisingConfig;
use hr_peripheral::ble::driver::{
    BondState, DriverResult, EventSink, GattResponse, GattStatus, PeripheralDriver, RadioStatus,
};
use hr_peripheral::ble::gatt::ServiceDefinition;
use hr_peripheral::DriverError;
use hr_peripheral::ble::loopback::FailurePoint;
use hr_peripheral::ble::uuids::HEART_RATE_MEASUREMENT_UUID;
use hr_peripheral::{
    AccelerometerReading, AdvertisingState, AutoPauseController, AutoPauseConfig,
    CalorieEstimator, DeviceIdentifier, HeartRateReading, KnownDeviceStore, LoopbackDriver,
    ManualSensorHub, PauseReason, PeripheralConfig, PeripheralEngine, StartError,
    SubscriptionEvent,
};

fn device(address: &str) -> DeviceIdentifier {
    DeviceIdentifier::parse(address).unwrap()
}

fn engine(driver: &Arc<LoopbackDriver>) -> Arc<PeripheralEngine> {
    Arc::new(PeripheralEngine::new(driver.clone(), PeripheralConfig::ephemeral()).unwrap())
}

async fn wait_for(rx: &mut broadcast::Receiver<SubscriptionEvent>, expected: SubscriptionEvent) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if rx.recv().await.unwrap() == expected {
                break;
            }
        }
    })
    .await
    .expect("engine event not received");
}

/// Loopback driver whose central enables notifications in the middle of a
/// lifecycle call.
struct MidTransitionDriver {
    inner: Arc<LoopbackDriver>,
    central: DeviceIdentifier,
    enable_then_fail_advertising: AtomicBool,
    enable_during_stop: AtomicBool,
}

impl MidTransitionDriver {
    fn new(inner: Arc<LoopbackDriver>, central: DeviceIdentifier) -> Self {
        Self {
            inner,
            central,
            enable_then_fail_advertising: AtomicBool::new(false),
            enable_during_stop: AtomicBool::new(false),
        }
    }

    /// Connect, enable, and give the dispatcher time to process both.
    async fn enable_now(&self) {
        self.inner.connect(&self.central);
        self.inner.enable_notifications(&self.central);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[async_trait]
impl PeripheralDriver for MidTransitionDriver {
    fn radio_status(&self) -> RadioStatus {
        self.inner.radio_status()
    }

    async fn set_device_name(&self, name: &str) -> DriverResult<()> {
        self.inner.set_device_name(name).await
    }

    async fn open_gatt_server(
        &self,
        service: &ServiceDefinition,
        events: EventSink,
    ) -> DriverResult<()> {
        self.inner.open_gatt_server(service, events).await
    }

    async fn close_gatt_server(&self) -> DriverResult<()> {
        self.inner.close_gatt_server().await
    }

    async fn start_advertising(&self, config: &AdvertisingConfig) -> DriverResult<()> {
        if self.enable_then_fail_advertising.swap(false, Ordering::SeqCst) {
            self.enable_now().await;
            return Err(DriverError::new("start_advertising", "busy"));
        }
        self.inner.start_advertising(config).await
    }

    async fn stop_advertising(&self) -> DriverResult<()> {
        if self.enable_during_stop.swap(false, Ordering::SeqCst) {
            self.enable_now().await;
        }
        self.inner.stop_advertising().await
    }

    async fn notify_characteristic_changed(
        &self,
        device: &DeviceIdentifier,
        characteristic: Uuid,
        value: Bytes,
        confirm: bool,
    ) -> DriverResult<()> {
        self.inner
            .notify_characteristic_changed(device, characteristic, value, confirm)
            .await
    }

    async fn send_response(&self, response: GattResponse) -> DriverResult<()> {
        self.inner.send_response(response).await
    }

    async fn cancel_connection(&self, device: &DeviceIdentifier) -> DriverResult<()> {
        self.inner.cancel_connection(device).await
    }

    fn bond_state(&self, device: &DeviceIdentifier) -> BondState {
        self.inner.bond_state(device)
    }

    async fn remove_bond(&self, device: &DeviceIdentifier) -> DriverResult<()> {
        self.inner.remove_bond(device).await
    }
}

/// Let the dispatcher drain anything already emitted.
async fn settle(driver: &LoopbackDriver, engine: &PeripheralEngine, marker: &DeviceIdentifier) {
    let mut rx = engine.subscribe();
    driver.disconnect(marker);
    wait_for(&mut rx, SubscriptionEvent::DeviceDisconnected(marker.clone())).await;
}

#[tokio::test]
async fn test_connected_is_not_subscribed() {
    let driver = Arc::new(LoopbackDriver::new());
    let engine = engine(&driver);
    let phone = device("AA:00:00:00:00:01");

    tokio_test::assert_ok!(engine.start().await);

    let mut rx = engine.subscribe();
    driver.connect(&phone);
    wait_for(&mut rx, SubscriptionEvent::DeviceConnected(phone.clone())).await;

    for bpm in [60, 61, 62] {
        engine.notify(bpm).await;
    }

    assert!(engine.subscriber().is_none());
    assert!(driver.notifications().is_empty());
    assert!(engine.known_devices().contains(&phone));
}

#[tokio::test]
async fn test_enable_then_disable_notifications() {
    let driver = Arc::new(LoopbackDriver::new());
    let engine = engine(&driver);
    let phone = device("AA:00:00:00:00:01");

    tokio_test::assert_ok!(engine.start().await);

    let mut rx = engine.subscribe();
    driver.connect(&phone);
    driver.enable_notifications(&phone);
    wait_for(&mut rx, SubscriptionEvent::Subscribed(phone.clone())).await;

    // The write was acknowledged.
    let responses = driver.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, GattStatus::Success);

    engine.notify(88).await;
    let sent = driver.take_notifications();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].device, phone);
    assert_eq!(sent[0].characteristic, HEART_RATE_MEASUREMENT_UUID);
    assert_eq!(sent[0].value, Bytes::from_static(&[0x00, 88]));
    assert!(!sent[0].confirm);

    driver.disable_notifications(&phone);
    wait_for(&mut rx, SubscriptionEvent::Unsubscribed(phone.clone())).await;

    engine.notify(89).await;
    assert!(driver.notifications().is_empty());
}

#[tokio::test]
async fn test_disconnect_clears_subscriber() {
    let driver = Arc::new(LoopbackDriver::new());
    let engine = engine(&driver);
    let phone = device("AA:00:00:00:00:01");

    tokio_test::assert_ok!(engine.start().await);

    let mut rx = engine.subscribe();
    driver.connect(&phone);
    driver.enable_notifications(&phone);
    wait_for(&mut rx, SubscriptionEvent::Subscribed(phone.clone())).await;

    driver.disconnect(&phone);
    wait_for(&mut rx, SubscriptionEvent::DeviceDisconnected(phone.clone())).await;

    assert!(engine.subscriber().is_none());
    engine.notify(70).await;
    assert!(driver.notifications().is_empty());
    assert!(engine.known_devices().contains(&phone));
}

#[tokio::test]
async fn test_body_sensor_location_and_cccd_reads() {
    let driver = Arc::new(LoopbackDriver::new());
    let engine = engine(&driver);
    let phone = device("AA:00:00:00:00:01");
    let marker = device("AA:00:00:00:00:FF");

    tokio_test::assert_ok!(engine.start().await);

    driver.read_body_sensor_location(&phone);
    driver.read_cccd(&phone);
    settle(&driver, &engine, &marker).await;

    let responses = driver.responses();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].status, GattStatus::Success);
    assert_eq!(responses[0].value, Some(Bytes::from_static(&[0x01])));
    assert_eq!(responses[1].value, Some(Bytes::from_static(&[0x00, 0x00])));
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let driver = Arc::new(LoopbackDriver::new());
    let engine = engine(&driver);

    tokio_test::assert_ok!(engine.start().await);
    tokio_test::assert_ok!(engine.start().await);

    assert_eq!(driver.open_count(), 1);
    assert_eq!(engine.state(), AdvertisingState::Advertising);

    let config = driver.advertising_config().unwrap();
    assert_eq!(config.local_name.as_deref(), Some("HR Monitor"));
    assert_eq!(driver.device_name().as_deref(), Some("HR Monitor"));

    engine.stop().await;
    engine.stop().await;
    assert_eq!(engine.state(), AdvertisingState::Stopped);
    assert!(!driver.is_server_open());
}

#[tokio::test]
async fn test_advertising_failure_closes_server_and_retries() {
    let driver = Arc::new(LoopbackDriver::new());
    let engine = engine(&driver);

    driver.fail(FailurePoint::StartAdvertising);
    let result = engine.start().await;
    assert!(matches!(result, Err(StartError::Advertising { .. })));
    assert_eq!(engine.state(), AdvertisingState::Failed);
    assert!(!driver.is_server_open());

    driver.heal(FailurePoint::StartAdvertising);
    tokio_test::assert_ok!(engine.start().await);
    assert_eq!(driver.open_count(), 2);
    assert!(engine.is_advertising());
}

#[tokio::test]
async fn test_forget_all_releases_every_device() {
    let driver = Arc::new(LoopbackDriver::new());
    let engine = engine(&driver);
    let phone = device("AA:00:00:00:00:01");
    let tablet = device("AA:00:00:00:00:02");

    tokio_test::assert_ok!(engine.start().await);

    let mut rx = engine.subscribe();
    driver.connect(&phone);
    driver.connect(&tablet);
    driver.enable_notifications(&phone);
    wait_for(&mut rx, SubscriptionEvent::Subscribed(phone.clone())).await;

    driver.set_bond_state(&phone, BondState::Bonded);
    driver.fail(FailurePoint::CancelConnection);

    engine.forget_all(true).await;

    assert!(engine.subscriber().is_none());
    assert!(engine.known_devices().is_empty());
    assert_eq!(driver.unbonded(), vec![phone.clone()]);

    engine.notify(90).await;
    assert!(driver.notifications().is_empty());
}

#[tokio::test]
async fn test_forget_one_keeps_others() {
    let driver = Arc::new(LoopbackDriver::new());
    let engine = engine(&driver);
    let phone = device("AA:00:00:00:00:01");
    let tablet = device("AA:00:00:00:00:02");

    tokio_test::assert_ok!(engine.start().await);

    let mut rx = engine.subscribe();
    driver.connect(&phone);
    driver.connect(&tablet);
    wait_for(&mut rx, SubscriptionEvent::DeviceConnected(tablet.clone())).await;

    engine.forget("aa:00:00:00:00:01", false).await;

    let known: Vec<_> = engine.known_devices().into_iter().collect();
    assert_eq!(known, vec![tablet]);
    assert!(driver.unbonded().is_empty());
}

#[tokio::test]
async fn test_known_devices_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("known_devices");
    let phone = device("AA:00:00:00:00:01");

    {
        let driver = Arc::new(LoopbackDriver::new());
        let config = PeripheralConfig {
            known_devices_path: Some(path.clone()),
            ..PeripheralConfig::ephemeral()
        };
        let engine = PeripheralEngine::new(driver.clone(), config).unwrap();
        tokio_test::assert_ok!(engine.start().await);

        let mut rx = engine.subscribe();
        driver.connect(&phone);
        wait_for(&mut rx, SubscriptionEvent::DeviceConnected(phone.clone())).await;
        engine.stop().await;
    }

    let store = KnownDeviceStore::open(&path).unwrap();
    assert!(store.contains(&phone));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "AA:00:00:00:00:01");
}

#[tokio::test]
async fn test_auto_pause_drives_engine() {
    let driver = Arc::new(LoopbackDriver::new());
    let engine = engine(&driver);
    let sensors = Arc::new(ManualSensorHub::new(false));
    let controller = AutoPauseController::new(
        engine.clone(),
        sensors.clone(),
        Arc::new(CalorieEstimator::default()),
        AutoPauseConfig::default(),
    );
    let phone = device("AA:00:00:00:00:01");

    tokio_test::assert_ok!(controller.start().await);
    assert!(engine.is_advertising());

    let mut rx = engine.subscribe();
    driver.connect(&phone);
    driver.enable_notifications(&phone);
    wait_for(&mut rx, SubscriptionEvent::Subscribed(phone.clone())).await;

    let t0 = Instant::now();
    let still = |secs: f64| AccelerometerReading {
        x: 0.0,
        y: 0.0,
        z: 9.806_65,
        timestamp: t0 + Duration::from_secs_f64(secs),
    };

    controller.handle_accelerometer(still(0.0)).await;
    controller
        .handle_heart_rate(HeartRateReading {
            bpm: 75.0,
            timestamp: t0,
        })
        .await;
    assert_eq!(driver.take_notifications().len(), 1);

    controller.handle_accelerometer(still(15.0)).await;
    assert!(controller.state().await.is_paused());
    assert_eq!(engine.state(), AdvertisingState::Stopped);
    assert!(engine.subscriber().is_none());
    assert!(!sensors.is_heart_rate_registered());

    // Samples while paused are counted but not sent.
    controller
        .handle_heart_rate(HeartRateReading {
            bpm: 76.0,
            timestamp: t0,
        })
        .await;
    assert!(driver.notifications().is_empty());

    assert!(controller.tick(t0 + Duration::from_secs(31)).await);
    assert!(engine.is_advertising());
    assert_eq!(driver.open_count(), 2);
    assert_eq!(controller.snapshot().await.reason, PauseReason::Watchdog);
    assert_eq!(controller.snapshot().await.current_bpm, Some(76));
}

#[tokio::test]
async fn test_enable_during_failed_start_does_not_survive_retry() {
    let loopback = Arc::new(LoopbackDriver::new());
    let phone = device("AA:00:00:00:00:01");
    let driver = Arc::new(MidTransitionDriver::new(loopback.clone(), phone.clone()));
    driver.enable_then_fail_advertising.store(true, Ordering::SeqCst);

    let engine = PeripheralEngine::new(driver.clone(), PeripheralConfig::ephemeral()).unwrap();
    let mut rx = engine.subscribe();

    assert!(matches!(
        engine.start().await,
        Err(StartError::Advertising { .. })
    ));
    // The enable was honoured while starting, then dropped with the server.
    wait_for(&mut rx, SubscriptionEvent::Subscribed(phone.clone())).await;
    assert_eq!(engine.state(), AdvertisingState::Failed);
    assert!(engine.subscriber().is_none());

    tokio_test::assert_ok!(engine.start().await);
    assert_eq!(engine.state(), AdvertisingState::Advertising);
    assert!(engine.subscriber().is_none());

    engine.notify(77).await;
    assert!(loopback.notifications().is_empty());
}

#[tokio::test]
async fn test_enable_during_stop_does_not_survive_restart() {
    let loopback = Arc::new(LoopbackDriver::new());
    let phone = device("AA:00:00:00:00:01");
    let driver = Arc::new(MidTransitionDriver::new(loopback.clone(), phone.clone()));

    let engine = PeripheralEngine::new(driver.clone(), PeripheralConfig::ephemeral()).unwrap();
    tokio_test::assert_ok!(engine.start().await);

    driver.enable_during_stop.store(true, Ordering::SeqCst);
    engine.stop().await;
    assert_eq!(engine.state(), AdvertisingState::Stopped);
    assert!(engine.subscriber().is_none());

    tokio_test::assert_ok!(engine.start().await);
    assert!(engine.subscriber().is_none());

    engine.notify(77).await;
    assert!(loopback.notifications().is_empty());
}
