//! Remote device identity.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Identifier of a remote central (a MAC-style address on most platforms).
///
/// Identity is case-insensitive: the address is trimmed and upper-cased on
/// construction, so `aa:bb:...` and `AA:BB:...` are the same device. Commas
/// and whitespace are rejected because identifiers are persisted as a
/// comma-joined list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceIdentifier(String);

impl DeviceIdentifier {
    /// Parse an address, returning `None` for empty or malformed input.
    pub fn parse(address: &str) -> Option<Self> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed
            .chars()
            .any(|c| c == ',' || c.is_whitespace() || c.is_control())
        {
            return None;
        }

        Some(Self(trimmed.to_ascii_uppercase()))
    }

    /// The normalized address.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the address is a colon-separated 48-bit MAC address.
    pub fn is_mac_address(&self) -> bool {
        let parts: Vec<&str> = self.0.split(':').collect();
        parts.len() == 6
            && parts
                .iter()
                .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| Error::InvalidParameter {
            name: "device_address".to_string(),
            value: s.to_string(),
        })
    }
}

impl AsRef<str> for DeviceIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
