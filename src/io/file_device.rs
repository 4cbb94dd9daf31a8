// Block device / regular file backed implementation of BlockDevice

use super::{BlockDevice, DeviceIoError, DeviceIoResult};
use crate::drives::operations::secure_erase::SecureErase;
use crate::DeviceType;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

pub struct FileDevice {
    file: File,
    path: PathBuf,
    capacity: u64,
    /// Device family used to pick the native erase command, if any
    hardware_erase: Option<DeviceType>,
}

impl FileDevice {
    /// Open a device node (or image file) for positioned read/write.
    ///
    /// Capacity is taken from the end offset, which works for block devices
    /// where `metadata().len()` reports zero.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let capacity = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            capacity,
            hardware_erase: None,
        })
    }

    /// Enable the native secure erase command for this device family
    pub fn with_hardware_erase(mut self, device_type: DeviceType) -> Self {
        self.hardware_erase = Some(device_type);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Evict the range from the page cache. Only clean pages are dropped, so
    /// callers sync before reading back.
    pub(crate) fn drop_cached(&self, offset: u64, len: usize) -> std::io::Result<()> {
        let rc = unsafe {
            libc::posix_fadvise(
                self.file.as_raw_fd(),
                offset as libc::off_t,
                len as libc::off_t,
                libc::POSIX_FADV_DONTNEED,
            )
        };
        if rc != 0 {
            return Err(std::io::Error::from_raw_os_error(rc));
        }
        Ok(())
    }

    fn check_range(&self, offset: u64, len: usize) -> DeviceIoResult<()> {
        let end = offset.checked_add(len as u64);
        match end {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(DeviceIoError::Fatal(format!(
                "range {}+{} exceeds capacity {} of {}",
                offset,
                len,
                self.capacity,
                self.path.display()
            ))),
        }
    }
}

impl BlockDevice for FileDevice {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> DeviceIoResult<()> {
        self.check_range(offset, data.len())?;
        self.file.write_all_at(data, offset)?;
        Ok(())
    }

    /// Reads bypass cached pages so verification sees what the device stored
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> DeviceIoResult<()> {
        self.check_range(offset, buf.len())?;
        self.drop_cached(offset, buf.len())?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn sync(&mut self) -> DeviceIoResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn hardware_erase(&mut self) -> DeviceIoResult<()> {
        let device_type = self.hardware_erase.ok_or_else(|| {
            DeviceIoError::Unsupported(format!(
                "no native erase command configured for {}",
                self.path.display()
            ))
        })?;

        let path = self.path.to_string_lossy().into_owned();
        SecureErase::run(&path, device_type).map_err(|e| DeviceIoError::Fatal(format!("{:#}", e)))
    }
}
