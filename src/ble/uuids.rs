//! BLE UUIDs for the standard Heart Rate Service.
//!
//! All four are Bluetooth SIG assigned numbers expanded onto the base UUID
//! `0000xxxx-0000-1000-8000-00805f9b34fb`.

use btleplug::api::bleuuid::uuid_from_u16;
use uuid::Uuid;

/// Heart Rate Service UUID (0x180D).
pub const HEART_RATE_SERVICE_UUID: Uuid = uuid_from_u16(0x180D);

/// Heart Rate Measurement characteristic UUID (0x2A37, Notify).
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = uuid_from_u16(0x2A37);

/// Body Sensor Location characteristic UUID (0x2A38, Read).
pub const BODY_SENSOR_LOCATION_UUID: Uuid = uuid_from_u16(0x2A38);

/// Client Characteristic Configuration descriptor UUID (0x2902).
pub const CLIENT_CHARACTERISTIC_CONFIGURATION_UUID: Uuid = uuid_from_u16(0x2902);

/// CCCD value a central writes to enable notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value a central writes to disable notifications and indications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Check if a service UUID is the Heart Rate Service.
pub fn is_heart_rate_service(uuid: &Uuid) -> bool {
    *uuid == HEART_RATE_SERVICE_UUID
}

/// Check if a written CCCD value enables notifications.
///
/// Only bit 0 of the first byte (notifications) is inspected; the
/// indication bit is ignored because the measurement is notify-only.
pub fn cccd_enables_notifications(value: &[u8]) -> bool {
    value
        .first()
        .map(|flags| flags & ENABLE_NOTIFICATION_VALUE[0] != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            HEART_RATE_SERVICE_UUID.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            HEART_RATE_MEASUREMENT_UUID.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
        assert!(BODY_SENSOR_LOCATION_UUID.to_string().contains("2a38"));
        assert!(CLIENT_CHARACTERISTIC_CONFIGURATION_UUID
            .to_string()
            .contains("2902"));
    }

    #[test]
    fn test_is_heart_rate_service() {
        assert!(is_heart_rate_service(&HEART_RATE_SERVICE_UUID));
        assert!(!is_heart_rate_service(&HEART_RATE_MEASUREMENT_UUID));
    }

    #[test]
    fn test_cccd_enables_notifications() {
        assert!(cccd_enables_notifications(&ENABLE_NOTIFICATION_VALUE));
        assert!(cccd_enables_notifications(&[0x03, 0x00]));
        assert!(!cccd_enables_notifications(&DISABLE_NOTIFICATION_VALUE));
        // Indications only
        assert!(!cccd_enables_notifications(&[0x02, 0x00]));
        assert!(!cccd_enables_notifications(&[]));
    }
}
