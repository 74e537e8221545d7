//! Host-facing heart rate service.
//!
//! Wires the peripheral engine, the auto-pause controller, the energy
//! estimator and the watchdog together, and exposes the small control
//! surface a host application drives (start/stop advertising, push a heart
//! rate, forget devices).

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ble::advertising::AdvertisingState;
use crate::ble::driver::PeripheralDriver;
use crate::ble::peripheral::PeripheralEngine;
use crate::calories::CalorieEstimator;
use crate::config::ServiceConfig;
use crate::control::{
    spawn_watchdog, AutoPauseController, PauseReason, StatusSnapshot, WatchdogHandle,
};
use crate::error::Result;
use crate::sensor::{SensorEvent, SensorHub};
use crate::utils::clamp_bpm;

/// Heart rate peripheral with auto-pause.
pub struct HeartRateService {
    engine: Arc<PeripheralEngine>,
    controller: Arc<AutoPauseController>,
    sensors: Arc<dyn SensorHub>,
    config: ServiceConfig,
    watchdog: Mutex<Option<WatchdogHandle>>,
}

impl HeartRateService {
    /// Build the service on top of a platform driver and sensor hub.
    ///
    /// # Errors
    ///
    /// Returns an error if the known-device file cannot be read.
    pub fn new(
        driver: Arc<dyn PeripheralDriver>,
        sensors: Arc<dyn SensorHub>,
        config: ServiceConfig,
    ) -> Result<Self> {
        let engine = Arc::new(PeripheralEngine::new(driver, config.peripheral.clone())?);
        let controller = Arc::new(AutoPauseController::new(
            engine.clone(),
            sensors.clone(),
            Arc::new(CalorieEstimator::new(config.body_profile)),
            config.auto_pause,
        ));

        Ok(Self {
            engine,
            controller,
            sensors,
            config,
            watchdog: Mutex::new(None),
        })
    }

    /// Register sensors, start advertising and arm the watchdog.
    ///
    /// Returns whether advertising came up. The watchdog runs either way.
    pub async fn start(&self) -> bool {
        if self.sensors.has_off_body_sensor() {
            info!("Off-body detector available");
        } else {
            info!("No off-body detector, relying on accelerometer");
        }

        let started = self.controller.start().await.is_ok();

        let mut watchdog = self.watchdog.lock();
        if watchdog.is_none() {
            *watchdog = Some(spawn_watchdog(
                self.controller.clone(),
                self.config.auto_pause.watchdog_period,
            ));
            debug!(
                "Watchdog armed every {:?}",
                self.config.auto_pause.watchdog_period
            );
        }

        started
    }

    /// Disarm the watchdog, release sensors and stop advertising.
    pub async fn shutdown(&self) {
        if let Some(watchdog) = self.watchdog.lock().take() {
            watchdog.unregister();
        }
        self.controller.shutdown().await;
        info!("Heart rate service shut down");
    }

    /// Start advertising, resuming the controller if it was paused.
    ///
    /// Returns whether the peripheral is advertising afterwards.
    pub async fn start_advertising(&self) -> bool {
        if self.controller.pause(false, PauseReason::Manual).await {
            return self.engine.state() == AdvertisingState::Advertising;
        }
        match self.engine.start().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not start advertising: {}", e);
                false
            }
        }
    }

    /// Stop advertising as a manual pause.
    ///
    /// The controller treats it like any other pause: motion, an on-body
    /// reading or the watchdog resume it.
    pub async fn stop_advertising(&self) {
        if !self.controller.pause(true, PauseReason::Manual).await {
            self.engine.stop().await;
        }
    }

    /// Push a heart rate to the subscriber. Clamped to `0..=255`.
    pub async fn update_heart_rate(&self, bpm: i32) {
        self.engine.notify(clamp_bpm(bpm)).await;
    }

    /// Forget every known device.
    pub async fn forget_all_devices(&self, also_unbond: bool) {
        self.engine.forget_all(also_unbond).await;
    }

    /// Forget one device by address.
    pub async fn forget_device(&self, address: &str, also_unbond: bool) {
        self.engine.forget(address, also_unbond).await;
    }

    /// Addresses of known devices, sorted.
    pub fn known_devices(&self) -> Vec<String> {
        self.engine
            .known_devices()
            .into_iter()
            .map(|device| device.to_string())
            .collect()
    }

    /// Feed one sensor reading to the controller.
    pub async fn handle_sensor_event(&self, event: SensorEvent) {
        self.controller.handle_event(event).await;
    }

    /// Consume sensor readings until the sender side closes.
    pub async fn run(&self, mut events: mpsc::Receiver<SensorEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_sensor_event(event).await;
        }
        debug!("Sensor stream closed");
    }

    /// Current controller status.
    pub async fn status(&self) -> StatusSnapshot {
        self.controller.snapshot().await
    }

    /// Check if the watchdog is armed.
    pub fn is_watchdog_running(&self) -> bool {
        self.watchdog.lock().is_some()
    }

    /// The peripheral engine.
    pub fn engine(&self) -> &Arc<PeripheralEngine> {
        &self.engine
    }

    /// The auto-pause controller.
    pub fn controller(&self) -> &Arc<AutoPauseController> {
        &self.controller
    }

    /// Service configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast;

    use crate::ble::device::DeviceIdentifier;
    use crate::ble::driver::RadioStatus;
    use crate::ble::loopback::LoopbackDriver;
    use crate::ble::peripheral::SubscriptionEvent;
    use crate::sensor::{HeartRateReading, ManualSensorHub, OffBodyReading};

    const PHONE: &str = "AA:BB:CC:DD:EE:01";

    fn phone() -> DeviceIdentifier {
        DeviceIdentifier::parse(PHONE).unwrap()
    }

    fn service_with(
        driver: Arc<LoopbackDriver>,
    ) -> (HeartRateService, Arc<ManualSensorHub>) {
        let sensors = Arc::new(ManualSensorHub::new(true));
        let service =
            HeartRateService::new(driver, sensors.clone(), ServiceConfig::ephemeral()).unwrap();
        (service, sensors)
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

    #[tokio::test]
    async fn test_start_brings_up_advertising() {
        let driver = Arc::new(LoopbackDriver::new());
        let (service, sensors) = service_with(driver.clone());

        assert!(service.start().await);
        assert!(driver.is_advertising());
        assert_eq!(driver.open_count(), 1);
        assert!(sensors.is_heart_rate_registered());
        assert!(service.is_watchdog_running());
        assert!(!service.status().await.paused);

        service.shutdown().await;
        assert!(!driver.is_advertising());
        assert!(!driver.is_server_open());
        assert!(!sensors.is_heart_rate_registered());
        assert!(!service.is_watchdog_running());
    }

    #[tokio::test]
    async fn test_start_without_radio_reports_failure() {
        let driver = Arc::new(LoopbackDriver::with_radio(RadioStatus::default()));
        let (service, _sensors) = service_with(driver.clone());

        assert!(!service.start().await);
        assert_eq!(service.engine().state(), AdvertisingState::Failed);
        assert!(!service.status().await.paused);
        assert!(service.is_watchdog_running());

        assert!(!service.start_advertising().await);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_heart_rate_clamps() {
        let driver = Arc::new(LoopbackDriver::new());
        let (service, _sensors) = service_with(driver.clone());
        let mut events = service.engine().subscribe();

        assert!(service.start_advertising().await);
        driver.connect(&phone());
        driver.enable_notifications(&phone());
        wait_for(&mut events, SubscriptionEvent::Subscribed(phone())).await;

        service.update_heart_rate(300).await;
        service.update_heart_rate(-5).await;
        service.update_heart_rate(72).await;

        let values: Vec<Bytes> = driver
            .take_notifications()
            .into_iter()
            .map(|n| n.value)
            .collect();
        assert_eq!(
            values,
            vec![
                Bytes::from_static(&[0x00, 255]),
                Bytes::from_static(&[0x00, 0]),
                Bytes::from_static(&[0x00, 72]),
            ]
        );
    }

    #[tokio::test]
    async fn test_off_body_pauses_and_resumes() {
        let driver = Arc::new(LoopbackDriver::new());
        let (service, sensors) = service_with(driver.clone());
        assert!(service.start().await);

        let now = Instant::now();
        service
            .handle_sensor_event(SensorEvent::OffBody(OffBodyReading {
                on_body: false,
                timestamp: now,
            }))
            .await;

        assert!(service.status().await.paused);
        assert!(!driver.is_advertising());
        assert!(!sensors.is_heart_rate_registered());

        service
            .handle_sensor_event(SensorEvent::OffBody(OffBodyReading {
                on_body: true,
                timestamp: now + Duration::from_secs(1),
            }))
            .await;

        assert!(!service.status().await.paused);
        assert!(driver.is_advertising());
        assert_eq!(driver.open_count(), 2);
        assert!(sensors.is_heart_rate_registered());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_known_devices_and_forget() {
        let driver = Arc::new(LoopbackDriver::new());
        let (service, _sensors) = service_with(driver.clone());
        let mut events = service.engine().subscribe();

        assert!(service.start_advertising().await);
        driver.connect(&phone());
        wait_for(&mut events, SubscriptionEvent::DeviceConnected(phone())).await;

        assert_eq!(service.known_devices(), vec![PHONE.to_string()]);

        service.forget_device("aa:bb:cc:dd:ee:01", false).await;
        assert!(service.known_devices().is_empty());
        assert_eq!(driver.cancelled(), vec![phone()]);

        service.forget_device("", true).await;
        assert_eq!(driver.cancelled().len(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_sensor_stream() {
        let driver = Arc::new(LoopbackDriver::new());
        let (service, _sensors) = service_with(driver);
        let (tx, rx) = mpsc::channel(8);

        let now = Instant::now();
        tx.send(SensorEvent::HeartRate(HeartRateReading {
            bpm: 250.0,
            timestamp: now,
        }))
        .await
        .unwrap();
        tx.send(SensorEvent::HeartRate(HeartRateReading {
            bpm: 71.6,
            timestamp: now,
        }))
        .await
        .unwrap();
        drop(tx);

        service.run(rx).await;

        let status = service.status().await;
        assert_eq!(status.current_bpm, Some(72));
        assert!(status.kcal > 0.0);
    }

    #[tokio::test]
    async fn test_manual_stop_and_start_go_through_controller() {
        let driver = Arc::new(LoopbackDriver::new());
        let (service, sensors) = service_with(driver.clone());
        assert!(service.start().await);

        service.stop_advertising().await;
        let status = service.status().await;
        assert!(status.paused);
        assert_eq!(status.reason, PauseReason::Manual);
        assert!(!driver.is_advertising());
        assert!(!sensors.is_heart_rate_registered());

        // The controller owns the pause, so the watchdog can lift it.
        let later = Instant::now() + service.config().auto_pause.resume_after * 2;
        assert!(service.controller().tick(later).await);
        assert!(driver.is_advertising());

        service.stop_advertising().await;
        assert!(service.start_advertising().await);
        let status = service.status().await;
        assert!(!status.paused);
        assert_eq!(status.reason, PauseReason::Manual);
        assert!(driver.is_advertising());
        assert!(sensors.is_heart_rate_registered());

        service.shutdown().await;
    }
}
