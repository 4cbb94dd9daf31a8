use super::detection::SysfsBackend;
use super::DeviceBackend;
use crate::io::{BlockDevice, DeviceIoError, DeviceIoResult};
use crate::{DeviceDescriptor, DeviceType, DriveError, DriveResult, HealthSnapshot, HealthStatus};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Faults injected into a simulated disk
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Disk vanishes once this many bytes have been written to it
    pub disconnect_after_bytes: Option<u64>,
    /// The next N writes fail with a transient error
    pub transient_write_failures: u32,
    /// Writes touching this offset report success but leave the old content
    pub drop_writes_at: Option<u64>,
    /// Sleep before every write
    pub write_delay: Option<Duration>,
    /// Native erase command fails
    pub fail_hardware_erase: bool,
}

#[derive(Debug)]
struct DiskState {
    data: Vec<u8>,
    plan: FaultPlan,
    bytes_written: u64,
}

struct SimDisk {
    descriptor: DeviceDescriptor,
    state: Arc<Mutex<DiskState>>,
    present: Arc<AtomicBool>,
}

/// In-memory devices for tests and demos
pub struct SimulatedBackend {
    disks: Mutex<BTreeMap<String, SimDisk>>,
    available: AtomicBool,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            disks: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// The four devices of the product demo, scaled down to a few MiB each
    pub fn demo() -> Self {
        let backend = Self::new();
        let mib = 1024 * 1024;

        #[rustfmt::skip]
        let demo = [
            ("sda", "Samsung SSD 850 EVO 500GB", "S2RBNX0H512345", DeviceType::SSD, "SATA", 16 * mib, Some(45), true, false, false),
            ("nvme0n1", "WD Black SN750 1TB NVMe", "19283A801234", DeviceType::NVMe, "PCIe", 32 * mib, Some(52), true, true, false),
            ("sdb", "Seagate Barracuda 2TB HDD", "ZFL0ABCD", DeviceType::HDD, "SATA", 48 * mib, Some(38), false, false, true),
            ("mmcblk0", "Internal eMMC Storage", "0x1b2c3d4e", DeviceType::EMMC, "eMMC", 8 * mib, None, true, true, false),
        ];

        for (kname, model, serial, device_type, interface, capacity, temp, hw, encrypted, hpa) in
            demo
        {
            backend.add_device(DeviceDescriptor {
                device_id: SysfsBackend::derive_device_id(kname, model, Some(serial)),
                path: format!("/dev/{}", kname),
                model: model.to_string(),
                serial: Some(serial.to_string()),
                device_type,
                capacity_bytes: capacity,
                interface: interface.to_string(),
                supports_hardware_secure_erase: hw,
                is_encrypted: encrypted,
                has_host_protected_area: hpa,
                has_device_configuration_overlay: false,
                health: HealthSnapshot {
                    status: HealthStatus::Healthy,
                    temperature_celsius: temp,
                },
            });
        }

        backend
    }

    /// Minimal descriptor for a simulated disk
    pub fn descriptor(
        device_id: &str,
        device_type: DeviceType,
        capacity_bytes: u64,
    ) -> DeviceDescriptor {
        DeviceDescriptor {
            device_id: device_id.to_string(),
            path: format!("/sim/{}", device_id),
            model: format!("Simulated {}", device_type),
            serial: Some(device_id.to_string()),
            device_type,
            capacity_bytes,
            interface: "Simulated".to_string(),
            supports_hardware_secure_erase: false,
            is_encrypted: false,
            has_host_protected_area: false,
            has_device_configuration_overlay: false,
            health: HealthSnapshot::default(),
        }
    }

    /// Attach a disk; contents start as 0xA5 so a zero pass is observable
    pub fn add_device(&self, descriptor: DeviceDescriptor) {
        let state = DiskState {
            data: vec![0xA5; descriptor.capacity_bytes as usize],
            plan: FaultPlan::default(),
            bytes_written: 0,
        };
        lock(&self.disks).insert(
            descriptor.device_id.clone(),
            SimDisk {
                descriptor,
                state: Arc::new(Mutex::new(state)),
                present: Arc::new(AtomicBool::new(true)),
            },
        );
    }

    pub fn set_faults(&self, device_id: &str, plan: FaultPlan) {
        if let Some(disk) = lock(&self.disks).get(device_id) {
            lock(&disk.state).plan = plan;
        }
    }

    /// Unplug: the disk leaves the next scan and open handles start failing
    pub fn remove_device(&self, device_id: &str) {
        if let Some(disk) = lock(&self.disks).remove(device_id) {
            disk.present.store(false, Ordering::SeqCst);
        }
    }

    /// When unavailable, enumeration fails as if sysfs were missing
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn contents(&self, device_id: &str) -> Option<Vec<u8>> {
        lock(&self.disks)
            .get(device_id)
            .map(|disk| lock(&disk.state).data.clone())
    }

    pub fn bytes_written(&self, device_id: &str) -> u64 {
        lock(&self.disks)
            .get(device_id)
            .map(|disk| lock(&disk.state).bytes_written)
            .unwrap_or(0)
    }
}

impl DeviceBackend for SimulatedBackend {
    fn enumerate(&self) -> DriveResult<Vec<DeviceDescriptor>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(DriveError::ScanError(
                "simulated enumeration unavailable".to_string(),
            ));
        }
        Ok(lock(&self.disks)
            .values()
            .map(|disk| disk.descriptor.clone())
            .collect())
    }

    fn open(&self, device: &DeviceDescriptor) -> DriveResult<Box<dyn BlockDevice>> {
        let disks = lock(&self.disks);
        let disk = disks
            .get(&device.device_id)
            .ok_or_else(|| DriveError::DeviceNotFound(device.device_id.clone()))?;

        Ok(Box::new(SimulatedDevice {
            state: Arc::clone(&disk.state),
            present: Arc::clone(&disk.present),
            capacity: disk.descriptor.capacity_bytes,
            hardware_erase: disk.descriptor.supports_hardware_secure_erase,
        }))
    }
}

struct SimulatedDevice {
    state: Arc<Mutex<DiskState>>,
    present: Arc<AtomicBool>,
    capacity: u64,
    hardware_erase: bool,
}

impl SimulatedDevice {
    fn check_present(&self) -> DeviceIoResult<()> {
        if self.present.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceIoError::Disconnected("simulated device removed".to_string()))
        }
    }

    fn range(&self, offset: u64, len: usize) -> DeviceIoResult<std::ops::Range<usize>> {
        let end = offset + len as u64;
        if end > self.capacity {
            return Err(DeviceIoError::Fatal(format!(
                "range {}+{} exceeds capacity {}",
                offset, len, self.capacity
            )));
        }
        Ok(offset as usize..end as usize)
    }
}

impl BlockDevice for SimulatedDevice {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> DeviceIoResult<()> {
        self.check_present()?;
        let range = self.range(offset, data.len())?;

        let delay = lock(&self.state).plan.write_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = lock(&self.state);

        if let Some(limit) = state.plan.disconnect_after_bytes {
            if state.bytes_written + data.len() as u64 > limit {
                self.present.store(false, Ordering::SeqCst);
                return Err(DeviceIoError::Disconnected(format!(
                    "simulated disconnect at offset {}",
                    offset
                )));
            }
        }

        if state.plan.transient_write_failures > 0 {
            state.plan.transient_write_failures -= 1;
            return Err(DeviceIoError::Transient(format!(
                "simulated transient failure at offset {}",
                offset
            )));
        }

        state.bytes_written += data.len() as u64;

        if let Some(dropped) = state.plan.drop_writes_at {
            if range.contains(&(dropped as usize)) {
                return Ok(());
            }
        }

        state.data[range].copy_from_slice(data);
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> DeviceIoResult<()> {
        self.check_present()?;
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&lock(&self.state).data[range]);
        Ok(())
    }

    fn sync(&mut self) -> DeviceIoResult<()> {
        self.check_present()
    }

    fn hardware_erase(&mut self) -> DeviceIoResult<()> {
        self.check_present()?;
        if !self.hardware_erase {
            return Err(DeviceIoError::Unsupported(
                "simulated device has no native erase".to_string(),
            ));
        }

        let mut state = lock(&self.state);
        if state.plan.fail_hardware_erase {
            return Err(DeviceIoError::Fatal("simulated native erase failure".to_string()));
        }
        state.data.fill(0);
        Ok(())
    }
}
