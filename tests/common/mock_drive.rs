// Allow uppercase acronyms in test code (HDD, SSD)
#![allow(clippy::upper_case_acronyms, dead_code)]

//! File-backed mock drives
//!
//! Each drive is a temp file pre-filled with 0xAB to look like used media.
//! `MockDriveBackend` serves them to the inventory and opens them through the
//! real `FileDevice`, so the executor runs the same I/O path as on hardware.
use sayonara_engine::drives::{DeviceBackend, SimulatedBackend};
use sayonara_engine::io::{BlockDevice, FileDevice};
use sayonara_engine::{DeviceDescriptor, DeviceType, DriveError, DriveResult};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub struct MockDrive {
    pub descriptor: DeviceDescriptor,
    pub temp_file: NamedTempFile,
}

impl MockDrive {
    pub fn new(device_id: &str, device_type: DeviceType, size_kib: u64) -> std::io::Result<Self> {
        let mut temp_file = NamedTempFile::new()?;
        let size_bytes = size_kib * 1024;
        temp_file.write_all(&vec![0xAB; size_bytes as usize])?;
        temp_file.flush()?;

        let mut descriptor = SimulatedBackend::descriptor(device_id, device_type, size_bytes);
        descriptor.path = temp_file.path().to_string_lossy().into_owned();
        descriptor.interface = "File".to_string();

        Ok(Self {
            descriptor,
            temp_file,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp_file.path()
    }

    pub fn size_bytes(&self) -> u64 {
        self.descriptor.capacity_bytes
    }
}

/// Serves a fixed set of mock drives
pub struct MockDriveBackend {
    descriptors: Vec<DeviceDescriptor>,
}

impl MockDriveBackend {
    pub fn new(drives: &[&MockDrive]) -> Self {
        Self {
            descriptors: drives.iter().map(|d| d.descriptor.clone()).collect(),
        }
    }
}

impl DeviceBackend for MockDriveBackend {
    fn enumerate(&self) -> DriveResult<Vec<DeviceDescriptor>> {
        Ok(self.descriptors.clone())
    }

    fn open(&self, device: &DeviceDescriptor) -> DriveResult<Box<dyn BlockDevice>> {
        if !self.descriptors.iter().any(|d| d.device_id == device.device_id) {
            return Err(DriveError::DeviceNotFound(device.device_id.clone()));
        }
        Ok(Box::new(FileDevice::open(&device.path)?))
    }
}
