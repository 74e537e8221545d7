//! GATT service tree exposed by the peripheral.
//!
//! The tree is plain data handed to the platform driver, which turns it into
//! whatever its native GATT server expects. It is built once per engine and
//! never mutated afterwards.

use bytes::Bytes;
use uuid::Uuid;

use crate::ble::uuids::*;

/// Body Sensor Location value for "chest".
pub const BODY_SENSOR_LOCATION_CHEST: u8 = 0x01;

/// Characteristic properties advertised to centrals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    /// Value can be read.
    pub read: bool,
    /// Value can be written with a response.
    pub write: bool,
    /// Value changes are pushed as notifications.
    pub notify: bool,
    /// Value changes are pushed as indications.
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Notify-only.
    pub const NOTIFY: Self = Self {
        read: false,
        write: false,
        notify: true,
        indicate: false,
    };

    /// Read-only.
    pub const READ: Self = Self {
        read: true,
        write: false,
        notify: false,
        indicate: false,
    };
}

/// Attribute access permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttributePermissions {
    /// Reads require an encrypted link.
    pub read_encrypted: bool,
    /// Writes require an encrypted link.
    pub write_encrypted: bool,
}

impl AttributePermissions {
    /// Encrypted reads only.
    pub const READ_ENCRYPTED: Self = Self {
        read_encrypted: true,
        write_encrypted: false,
    };

    /// Encrypted reads and writes.
    pub const READ_WRITE_ENCRYPTED: Self = Self {
        read_encrypted: true,
        write_encrypted: true,
    };
}

/// A descriptor attached to a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorDefinition {
    /// Descriptor UUID.
    pub uuid: Uuid,
    /// Access permissions.
    pub permissions: AttributePermissions,
}

/// A characteristic inside the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDefinition {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Properties advertised to centrals.
    pub properties: CharacteristicProperties,
    /// Access permissions.
    pub permissions: AttributePermissions,
    /// Constant value for read-only characteristics.
    pub value: Option<Bytes>,
    /// Attached descriptors.
    pub descriptors: Vec<DescriptorDefinition>,
}

impl CharacteristicDefinition {
    /// Look up a descriptor by UUID.
    pub fn descriptor(&self, uuid: &Uuid) -> Option<&DescriptorDefinition> {
        self.descriptors.iter().find(|d| d.uuid == *uuid)
    }
}

/// A primary GATT service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether this is a primary service.
    pub primary: bool,
    /// Characteristics in registration order.
    pub characteristics: Vec<CharacteristicDefinition>,
}

impl ServiceDefinition {
    /// Look up a characteristic by UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicDefinition> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }

    /// Whether `(characteristic, descriptor)` names an attribute in this service.
    pub fn has_descriptor(&self, characteristic: &Uuid, descriptor: &Uuid) -> bool {
        self.characteristic(characteristic)
            .and_then(|c| c.descriptor(descriptor))
            .is_some()
    }
}

/// Build the Heart Rate Service tree.
///
/// - Heart Rate Measurement (0x2A37): notify-only, with a CCCD (0x2902).
/// - Body Sensor Location (0x2A38): read-only constant `0x01` (chest).
pub fn heart_rate_service() -> ServiceDefinition {
    let measurement = CharacteristicDefinition {
        uuid: HEART_RATE_MEASUREMENT_UUID,
        properties: CharacteristicProperties::NOTIFY,
        permissions: AttributePermissions::READ_ENCRYPTED,
        value: None,
        descriptors: vec![DescriptorDefinition {
            uuid: CLIENT_CHARACTERISTIC_CONFIGURATION_UUID,
            permissions: AttributePermissions::READ_WRITE_ENCRYPTED,
        }],
    };

    let body_sensor_location = CharacteristicDefinition {
        uuid: BODY_SENSOR_LOCATION_UUID,
        properties: CharacteristicProperties::READ,
        permissions: AttributePermissions::READ_ENCRYPTED,
        value: Some(Bytes::from_static(&[BODY_SENSOR_LOCATION_CHEST])),
        descriptors: Vec::new(),
    };

    ServiceDefinition {
        uuid: HEART_RATE_SERVICE_UUID,
        primary: true,
        characteristics: vec![measurement, body_sensor_location],
    }
}
