use super::operations::{HPADCOManager, SMARTMonitor, SecureErase};
use super::DeviceBackend;
use crate::io::{BlockDevice, FileDevice};
use crate::{DeviceDescriptor, DeviceType, DriveError, DriveResult, HealthSnapshot};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Bytes read from the start of a device when looking for encryption headers
const SIGNATURE_PROBE_LEN: usize = 4096;

/// Enumerates block devices from sysfs on Linux.
///
/// Probing is read-only. Any probe that fails (tool missing, unsupported
/// transport, permission) leaves the corresponding flag at its conservative
/// default instead of failing the scan.
pub struct SysfsBackend {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
    mounts_file: PathBuf,
    run_probes: bool,
    require_root: bool,
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsBackend {
    pub fn new() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/block"),
            dev_root: PathBuf::from("/dev"),
            mounts_file: PathBuf::from("/proc/mounts"),
            run_probes: true,
            require_root: true,
        }
    }

    /// Backend over an alternate sysfs/dev tree. External tool probes are off
    /// and root is not required.
    pub fn with_root(sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
            mounts_file: PathBuf::from("/proc/mounts"),
            run_probes: false,
            require_root: false,
        }
    }

    pub fn with_probes(mut self, enabled: bool) -> Self {
        self.run_probes = enabled;
        self
    }

    pub fn with_mounts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounts_file = path.into();
        self
    }

    /// Skip loop devices, ram disks, device mapper, optical and other virtual nodes
    pub(crate) fn should_skip_device(name: &str) -> bool {
        const VIRTUAL_PREFIXES: [&str; 8] = ["loop", "ram", "dm-", "sr", "zram", "nbd", "fd", "md"];
        VIRTUAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
    }

    pub(crate) fn classify(name: &str, rotational: Option<bool>) -> DeviceType {
        if name.starts_with("nvme") {
            DeviceType::NVMe
        } else if name.starts_with("mmcblk") {
            DeviceType::EMMC
        } else {
            match rotational {
                Some(true) => DeviceType::HDD,
                Some(false) => DeviceType::SSD,
                None => DeviceType::Other,
            }
        }
    }

    /// Transport from the resolved `/sys/block/<name>/device` link target
    pub(crate) fn interface_from_link(link: &str, name: &str) -> String {
        let interface = if link.contains("/usb") {
            "USB"
        } else if name.starts_with("nvme") || link.contains("/nvme") {
            "PCIe"
        } else if name.starts_with("mmcblk") || link.contains("/mmc") {
            "eMMC"
        } else if name.starts_with("vd") || link.contains("/virtio") {
            "VirtIO"
        } else if link.contains("/ata") {
            "SATA"
        } else if link.contains("/host") || link.contains("/target") {
            "SCSI"
        } else {
            "Unknown"
        };
        interface.to_string()
    }

    /// Stable id: hash of model and serial when a serial is known, which
    /// survives reboots and re-enumeration under a different kernel name
    pub(crate) fn derive_device_id(kernel_name: &str, model: &str, serial: Option<&str>) -> String {
        match serial {
            Some(serial) if !serial.is_empty() => {
                let mut hasher = Sha256::new();
                hasher.update(model.as_bytes());
                hasher.update(b"\0");
                hasher.update(serial.as_bytes());
                let digest = hasher.finalize();
                format!("dev-{}", &hex::encode(digest)[..16])
            }
            _ => format!("dev-{}", kernel_name),
        }
    }

    /// LUKS header at offset 0 or a BitLocker volume header at offset 3
    pub(crate) fn has_encryption_signature(header: &[u8]) -> bool {
        const LUKS_MAGIC: &[u8] = b"LUKS\xba\xbe";
        const BITLOCKER_MAGIC: &[u8] = b"-FVE-FS-";

        header.starts_with(LUKS_MAGIC)
            || header.get(3..3 + BITLOCKER_MAGIC.len()) == Some(BITLOCKER_MAGIC)
    }

    /// Device node or any of its partitions appears in the mount table
    pub(crate) fn is_mounted(mounts: &str, device_path: &str) -> bool {
        mounts.lines().any(|line| {
            let Some(source) = line.split_whitespace().next() else {
                return false;
            };
            match source.strip_prefix(device_path) {
                Some("") => true,
                Some(rest) => rest
                    .trim_start_matches('p')
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_digit()),
                None => false,
            }
        })
    }

    fn read_attr(dir: &Path, attr: &str) -> Option<String> {
        fs::read_to_string(dir.join(attr))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn describe(&self, name: &str) -> Result<DeviceDescriptor> {
        let dir = self.sysfs_root.join(name);

        let sectors: u64 = Self::read_attr(&dir, "size")
            .context("missing size attribute")?
            .parse()
            .context("unparseable size attribute")?;

        let rotational = Self::read_attr(&dir, "queue/rotational").map(|r| r == "1");
        let device_type = Self::classify(name, rotational);

        let model = Self::read_attr(&dir, "device/model")
            .or_else(|| Self::read_attr(&dir, "device/name"))
            .unwrap_or_else(|| "Unknown".to_string());
        let serial = Self::read_attr(&dir, "device/serial")
            .or_else(|| Self::read_attr(&dir, "wwid"))
            .or_else(|| Self::read_attr(&dir, "device/wwid"));

        let link = fs::read_link(dir.join("device"))
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let path = self.dev_root.join(name).to_string_lossy().into_owned();

        let mut descriptor = DeviceDescriptor {
            device_id: Self::derive_device_id(name, &model, serial.as_deref()),
            path: path.clone(),
            model,
            serial,
            device_type,
            capacity_bytes: sectors.saturating_mul(512),
            interface: Self::interface_from_link(&link, name),
            supports_hardware_secure_erase: false,
            is_encrypted: false,
            has_host_protected_area: false,
            has_device_configuration_overlay: false,
            health: HealthSnapshot::default(),
        };

        descriptor.is_encrypted = match Self::read_header(&path) {
            Ok(header) => Self::has_encryption_signature(&header),
            Err(e) => {
                tracing::debug!(device = %path, error = %e, "encryption signature probe skipped");
                false
            }
        };

        if self.run_probes {
            self.probe_capabilities(&mut descriptor);
        }

        Ok(descriptor)
    }

    fn read_header(path: &str) -> Result<Vec<u8>> {
        let mut file = fs::File::open(path).with_context(|| format!("cannot open {}", path))?;
        let mut header = vec![0u8; SIGNATURE_PROBE_LEN];
        let mut filled = 0;
        while filled < header.len() {
            let n = file.read(&mut header[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        header.truncate(filled);
        Ok(header)
    }

    fn probe_capabilities(&self, descriptor: &mut DeviceDescriptor) {
        let path = descriptor.path.clone();

        match descriptor.device_type {
            // HPA/DCO only exist on ATA; NVMe, eMMC and USB bridges don't have them
            DeviceType::HDD | DeviceType::SSD if descriptor.interface == "SATA" => {
                descriptor.supports_hardware_secure_erase = Self::probe(
                    "ATA security",
                    &path,
                    HPADCOManager::supports_security_erase(&path),
                );
                descriptor.has_host_protected_area = Self::probe(
                    "HPA",
                    &path,
                    HPADCOManager::detect_hpa(&path).map(|h| h.is_some()),
                );
                descriptor.has_device_configuration_overlay = Self::probe(
                    "DCO",
                    &path,
                    HPADCOManager::detect_dco(&path).map(|d| d.is_some()),
                );
            }
            DeviceType::NVMe => {
                descriptor.supports_hardware_secure_erase =
                    Self::probe("NVMe format", &path, SecureErase::nvme_supports_format(&path));
            }
            _ => {}
        }

        let is_nvme = descriptor.device_type == DeviceType::NVMe;
        match SMARTMonitor::get_health(&path, is_nvme) {
            Ok(health) => descriptor.health = health,
            Err(e) => tracing::debug!(device = %path, error = %e, "SMART probe failed"),
        }
    }

    fn probe(what: &str, path: &str, result: Result<bool>) -> bool {
        result.unwrap_or_else(|e| {
            tracing::debug!(
                device = %path,
                probe = what,
                error = %e,
                "probe failed, assuming absent"
            );
            false
        })
    }

    fn is_root() -> bool {
        unsafe { libc::geteuid() == 0 }
    }
}

impl DeviceBackend for SysfsBackend {
    fn enumerate(&self) -> DriveResult<Vec<DeviceDescriptor>> {
        if self.require_root && !Self::is_root() {
            return Err(DriveError::ScanError(
                "root privileges are required to probe block devices".to_string(),
            ));
        }

        let entries = fs::read_dir(&self.sysfs_root).map_err(|e| {
            DriveError::ScanError(format!("cannot read {}: {}", self.sysfs_root.display(), e))
        })?;

        let mut devices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DriveError::ScanError(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();

            if Self::should_skip_device(&name) {
                continue;
            }

            match self.describe(&name) {
                Ok(descriptor) => {
                    tracing::debug!(
                        device_id = %descriptor.device_id,
                        path = %descriptor.path,
                        device_type = %descriptor.device_type,
                        capacity = descriptor.capacity_bytes,
                        "detected device"
                    );
                    devices.push(descriptor);
                }
                Err(e) => {
                    tracing::warn!(
                        device = %name,
                        error = %format!("{:#}", e),
                        "skipping unreadable device"
                    );
                }
            }
        }

        Ok(devices)
    }

    fn open(&self, device: &DeviceDescriptor) -> DriveResult<Box<dyn BlockDevice>> {
        let mounts = fs::read_to_string(&self.mounts_file).map_err(|e| {
            DriveError::PermissionDenied(format!(
                "cannot read {} to check mount state: {}",
                self.mounts_file.display(),
                e
            ))
        })?;

        if Self::is_mounted(&mounts, &device.path) {
            return Err(DriveError::PermissionDenied(format!(
                "{} or one of its partitions is mounted",
                device.path
            )));
        }

        let file = FileDevice::open(&device.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                DriveError::PermissionDenied(format!("{}: {}", device.path, e))
            }
            std::io::ErrorKind::NotFound => DriveError::DeviceNotFound(device.device_id.clone()),
            _ if matches!(e.raw_os_error(), Some(libc::ENODEV) | Some(libc::ENXIO)) => {
                DriveError::DeviceDisconnected(device.device_id.clone())
            }
            _ => DriveError::IoError(e),
        })?;

        let file = if device.supports_hardware_secure_erase {
            file.with_hardware_erase(device.device_type)
        } else {
            file
        };

        Ok(Box::new(file))
    }
}
