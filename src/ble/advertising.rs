//! Advertising lifecycle and parameters.

/// Lifecycle of the advertiser and its GATT server.
///
/// `Stopped -> Starting -> Advertising | Failed`, and
/// `Advertising -> Stopped` on stop (pause, shutdown). `Failed` behaves like
/// `Stopped` for the next start attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdvertisingState {
    /// Not advertising, no GATT server.
    #[default]
    Stopped,
    /// A start request is in flight.
    Starting,
    /// GATT server open and advertising.
    Advertising,
    /// The last start attempt failed.
    Failed,
}

impl AdvertisingState {
    /// Check if advertising.
    pub fn is_advertising(&self) -> bool {
        matches!(self, Self::Advertising)
    }

    /// Check if a start attempt may begin from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for AdvertisingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Starting => write!(f, "Starting"),
            Self::Advertising => write!(f, "Advertising"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Advertising interval preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdvertiseMode {
    /// Longest interval, least power.
    LowPower,
    /// Middle ground.
    Balanced,
    /// Shortest interval, fastest discovery.
    #[default]
    LowLatency,
}

/// Transmit power preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TxPowerLevel {
    /// Lowest power.
    UltraLow,
    /// Low power.
    Low,
    /// Medium power.
    Medium,
    /// Highest power.
    #[default]
    High,
}

/// Advertising timing and payload options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdvertisingSettings {
    /// Interval preset.
    pub mode: AdvertiseMode,
    /// Transmit power preset.
    pub tx_power: TxPowerLevel,
    /// Whether centrals may connect.
    pub connectable: bool,
    /// Include the TX power level in the advertising payload.
    pub include_tx_power_level: bool,
    /// Include the device name in the scan response.
    pub include_device_name: bool,
}

impl Default for AdvertisingSettings {
    fn default() -> Self {
        Self {
            mode: AdvertiseMode::LowLatency,
            tx_power: TxPowerLevel::High,
            connectable: true,
            include_tx_power_level: false,
            include_device_name: true,
        }
    }
}

/// Everything the driver needs to start advertising.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingConfig {
    /// Service UUIDs placed in the advertising payload.
    pub service_uuids: Vec<uuid::Uuid>,
    /// Name placed in the scan response, if enabled.
    pub local_name: Option<String>,
    /// Timing and payload options.
    pub settings: AdvertisingSettings,
}
