// Device inventory
//
// - detection.rs: Linux sysfs backend (real block devices)
// - simulated.rs: in-memory backend with fault injection
// - operations/: read-only probes (SMART, HPA/DCO, ATA security) and native erase commands

pub mod detection;
pub mod operations;
pub mod simulated;


pub use detection::SysfsBackend;
pub use simulated::{FaultPlan, SimulatedBackend};

use crate::io::BlockDevice;
use crate::{DeviceDescriptor, DriveError, DriveResult};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Source of devices: enumerates descriptors and opens them for raw I/O
pub trait DeviceBackend: Send + Sync {
    /// Read-only enumeration of attached devices
    fn enumerate(&self) -> DriveResult<Vec<DeviceDescriptor>>;

    /// Open a device for destructive I/O
    fn open(&self, device: &DeviceDescriptor) -> DriveResult<Box<dyn BlockDevice>>;
}

/// Latest view of attached devices, keyed by `device_id`
pub struct DeviceInventory {
    backend: Arc<dyn DeviceBackend>,
    latest: RwLock<HashMap<String, DeviceDescriptor>>,
}

impl DeviceInventory {
    pub fn new(backend: Arc<dyn DeviceBackend>) -> Self {
        Self {
            backend,
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Enumerate devices. The result supersedes the previous scan entirely:
    /// devices that disappeared are no longer resolvable.
    pub fn scan(&self) -> DriveResult<Vec<DeviceDescriptor>> {
        let mut devices = self.backend.enumerate()?;
        devices.sort_by(|a, b| a.path.cmp(&b.path));

        let mut by_id = HashMap::with_capacity(devices.len());
        devices.retain(|device| {
            if by_id.contains_key(&device.device_id) {
                tracing::warn!(
                    device_id = %device.device_id,
                    path = %device.path,
                    "duplicate device id in scan, ignoring second path"
                );
                return false;
            }
            by_id.insert(device.device_id.clone(), device.clone());
            true
        });

        tracing::info!(count = devices.len(), "device scan complete");
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = by_id;
        Ok(devices)
    }

    /// Descriptor from the most recent scan
    pub fn lookup(&self, device_id: &str) -> DriveResult<DeviceDescriptor> {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(device_id)
            .cloned()
            .ok_or_else(|| DriveError::DeviceNotFound(device_id.to_string()))
    }

    pub fn open(&self, device: &DeviceDescriptor) -> DriveResult<Box<dyn BlockDevice>> {
        self.backend.open(device)
    }
}
