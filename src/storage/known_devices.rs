//! Durable set of centrals that have connected to the peripheral.
//!
//! The set is stored as a single comma-joined line of device addresses.
//! Order is irrelevant; loading trims entries, drops empty or malformed ones
//! and de-duplicates case-insensitively.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::ble::device::DeviceIdentifier;
use crate::error::{Error, Result};

const SEPARATOR: char = ',';

/// Store for previously connected device identifiers.
///
/// Every mutation is saved synchronously before it returns, so a crash
/// loses at most the mutation in flight.
#[derive(Debug)]
pub struct KnownDeviceStore {
    /// Backing file, or `None` for an in-memory store.
    file_path: Option<PathBuf>,
    devices: BTreeSet<DeviceIdentifier>,
}

impl KnownDeviceStore {
    /// Open a file-backed store, loading any existing contents.
    ///
    /// A missing file is treated as an empty set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file exists but cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let file_path = path.into();
        let devices = Self::load(&file_path)?;

        info!(
            "Loaded {} known device(s) from {}",
            devices.len(),
            file_path.display()
        );

        Ok(Self {
            file_path: Some(file_path),
            devices,
        })
    }

    /// Create a store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            file_path: None,
            devices: BTreeSet::new(),
        }
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Snapshot of the known devices.
    pub fn devices(&self) -> BTreeSet<DeviceIdentifier> {
        self.devices.clone()
    }

    /// Check if a device is known.
    pub fn contains(&self, device: &DeviceIdentifier) -> bool {
        self.devices.contains(device)
    }

    /// Number of known devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if no device is known.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Record a device. Returns `true` if it was not known before.
    pub fn add(&mut self, device: DeviceIdentifier) -> Result<bool> {
        if !self.devices.insert(device.clone()) {
            return Ok(false);
        }

        debug!("Added known device: {}", device);
        self.save()?;
        Ok(true)
    }

    /// Forget one device. Returns `true` if it was known.
    pub fn remove(&mut self, device: &DeviceIdentifier) -> Result<bool> {
        if !self.devices.remove(device) {
            return Ok(false);
        }

        debug!("Removed known device: {}", device);
        self.save()?;
        Ok(true)
    }

    /// Forget every device and persist the empty set.
    pub fn clear(&mut self) -> Result<()> {
        self.devices.clear();
        self.save()
    }

    /// Parse the persisted representation.
    pub fn parse(content: &str) -> BTreeSet<DeviceIdentifier> {
        content
            .split(SEPARATOR)
            .filter_map(|entry| {
                let parsed = DeviceIdentifier::parse(entry);
                if parsed.is_none() && !entry.trim().is_empty() {
                    warn!("Discarding malformed known device entry: {:?}", entry);
                }
                parsed
            })
            .collect()
    }

    /// Render a set in the persisted representation.
    pub fn serialize(devices: &BTreeSet<DeviceIdentifier>) -> String {
        devices
            .iter()
            .map(DeviceIdentifier::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn load(path: &Path) -> Result<BTreeSet<DeviceIdentifier>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Known devices file doesn't exist, starting with empty set");
                Ok(BTreeSet::new())
            }
            Err(source) => Err(Error::Storage {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write the set atomically (temp file + rename).
    fn save(&self) -> Result<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };

        let storage_err = |source| Error::Storage {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(storage_err)?;
            }
        }

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp_path).map_err(storage_err)?;
            file.write_all(Self::serialize(&self.devices).as_bytes())
                .map_err(storage_err)?;
            file.sync_all().map_err(storage_err)?;
        }
        std::fs::rename(&tmp_path, path).map_err(storage_err)?;

        debug!("Saved {} known device(s)", self.devices.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn id(s: &str) -> DeviceIdentifier {
        DeviceIdentifier::parse(s).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = KnownDeviceStore::open(temp_dir.path().join("known_devices"))?;
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_trims_and_deduplicates() {
        let devices = KnownDeviceStore::parse(" aa:bb:cc:dd:ee:ff ,,AA:BB:CC:DD:EE:FF, 11:22:33:44:55:66,  ");
        let expected: BTreeSet<_> = [id("AA:BB:CC:DD:EE:FF"), id("11:22:33:44:55:66")]
            .into_iter()
            .collect();
        assert_eq!(devices, expected);
    }

    #[test]
    fn test_parse_empty() {
        assert!(KnownDeviceStore::parse("").is_empty());
        assert!(KnownDeviceStore::parse(" , ,").is_empty());
    }

    #[test]
    fn test_add_persists_immediately() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("known_devices");

        let mut store = KnownDeviceStore::open(&path)?;
        assert!(store.add(id("AA:BB:CC:DD:EE:FF"))?);
        assert!(!store.add(id("aa:bb:cc:dd:ee:ff"))?);
        assert!(store.add(id("11:22:33:44:55:66"))?);

        let reopened = KnownDeviceStore::open(&path)?;
        assert_eq!(reopened.devices(), store.devices());
        assert_eq!(reopened.len(), 2);
        Ok(())
    }

    #[test]
    fn test_remove_only_target() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("known_devices");

        let mut store = KnownDeviceStore::open(&path)?;
        store.add(id("AA:AA:AA:AA:AA:AA"))?;
        store.add(id("BB:BB:BB:BB:BB:BB"))?;

        assert!(store.remove(&id("aa:aa:aa:aa:aa:aa"))?);
        assert!(!store.remove(&id("CC:CC:CC:CC:CC:CC"))?);

        let reopened = KnownDeviceStore::open(&path)?;
        assert!(!reopened.contains(&id("AA:AA:AA:AA:AA:AA")));
        assert!(reopened.contains(&id("BB:BB:BB:BB:BB:BB")));
        Ok(())
    }

    #[test]
    fn test_clear_persists_empty_set() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("known_devices");

        let mut store = KnownDeviceStore::open(&path)?;
        store.add(id("AA:AA:AA:AA:AA:AA"))?;
        store.clear()?;

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        assert!(KnownDeviceStore::open(&path)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_file_format_is_comma_joined() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("known_devices");

        let mut store = KnownDeviceStore::open(&path)?;
        store.add(id("BB:BB:BB:BB:BB:BB"))?;
        store.add(id("AA:AA:AA:AA:AA:AA"))?;

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "AA:AA:AA:AA:AA:AA,BB:BB:BB:BB:BB:BB"
        );
        Ok(())
    }

    #[test]
    fn test_in_memory_store() -> Result<()> {
        let mut store = KnownDeviceStore::in_memory();
        assert!(store.path().is_none());
        store.add(id("AA:AA:AA:AA:AA:AA"))?;
        assert_eq!(store.len(), 1);
        store.clear()?;
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn test_unreadable_path_is_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        // A directory cannot be read as a file.
        let err = KnownDeviceStore::open(temp_dir.path()).unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
    }
}
