//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::ble::advertising::AdvertisingSettings;
use crate::calories::BodyProfile;

/// Default adapter name shown to centrals.
pub const DEFAULT_DEVICE_NAME: &str = "HR Monitor";

/// Directory name under the platform data directory.
pub const APP_DIR_NAME: &str = "hr-peripheral";

/// File name of the known-device list.
pub const KNOWN_DEVICES_FILE: &str = "known_devices";

/// Peripheral engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralConfig {
    /// Adapter name set before advertising.
    pub device_name: String,
    /// Advertising timing and payload options.
    pub advertising: AdvertisingSettings,
    /// Where known devices are persisted. `None` keeps them in memory.
    pub known_devices_path: Option<PathBuf>,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            advertising: AdvertisingSettings::default(),
            known_devices_path: default_known_devices_path(),
        }
    }
}

impl PeripheralConfig {
    /// Configuration with an in-memory known-device store.
    pub fn ephemeral() -> Self {
        Self {
            known_devices_path: None,
            ..Self::default()
        }
    }
}

/// Auto-pause thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AutoPauseConfig {
    /// Deviation from standard gravity (m/s²) above which a reading is motion.
    pub motion_threshold: f32,
    /// Stillness longer than this pauses an active peripheral.
    pub still_window: Duration,
    /// Pauses longer than this are ended by the watchdog.
    pub resume_after: Duration,
    /// Watchdog tick period.
    pub watchdog_period: Duration,
    /// Lowest accepted heart rate.
    pub min_bpm: u8,
    /// Highest accepted heart rate.
    pub max_bpm: u8,
}

impl Default for AutoPauseConfig {
    fn default() -> Self {
        Self {
            motion_threshold: 0.5,
            still_window: Duration::from_secs(15),
            resume_after: Duration::from_secs(15),
            watchdog_period: Duration::from_secs(5),
            min_bpm: 1,
            max_bpm: 230,
        }
    }
}

/// Everything [`HeartRateService`](crate::service::HeartRateService) needs.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceConfig {
    /// Peripheral engine settings.
    pub peripheral: PeripheralConfig,
    /// Auto-pause thresholds.
    pub auto_pause: AutoPauseConfig,
    /// Wearer profile used for energy estimation.
    pub body_profile: BodyProfile,
}

impl ServiceConfig {
    /// Defaults with an in-memory known-device store.
    pub fn ephemeral() -> Self {
        Self {
            peripheral: PeripheralConfig::ephemeral(),
            ..Self::default()
        }
    }
}

/// `<data dir>/hr-peripheral/known_devices`, if the platform has a data directory.
pub fn default_known_devices_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME).join(KNOWN_DEVICES_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peripheral_defaults() {
        let config = PeripheralConfig::default();
        assert_eq!(config.device_name, "HR Monitor");
        assert!(config.advertising.connectable);
        assert_eq!(config.known_devices_path, default_known_devices_path());

        assert!(PeripheralConfig::ephemeral().known_devices_path.is_none());
    }

    #[test]
    fn test_auto_pause_defaults() {
        let config = AutoPauseConfig::default();
        assert_eq!(config.motion_threshold, 0.5);
        assert_eq!(config.still_window, Duration::from_secs(15));
        assert_eq!(config.resume_after, Duration::from_secs(15));
        assert_eq!(config.watchdog_period, Duration::from_secs(5));
        assert_eq!((config.min_bpm, config.max_bpm), (1, 230));
    }

    #[test]
    fn test_service_config_ephemeral() {
        let config = ServiceConfig::ephemeral();
        assert!(config.peripheral.known_devices_path.is_none());
        assert_eq!(config.auto_pause, AutoPauseConfig::default());
        assert_eq!(config.body_profile.weight_kg, 75.0);
    }

    #[test]
    fn test_default_path_layout() {
        if let Some(path) = default_known_devices_path() {
            assert!(path.ends_with("hr-peripheral/known_devices"));
        }
    }
}
