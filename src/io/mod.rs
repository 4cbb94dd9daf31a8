pub mod file_device;

pub use file_device::FileDevice;

use crate::error::{ErrorClass, ErrorClassifier};

/// Size of one logical sector; chunk sizes are kept a multiple of this
pub const SECTOR_SIZE: usize = 512;

/// Device-level I/O errors, already classified for the retry policy
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceIoError {
    #[error("transient I/O error: {0}")]
    Transient(String),

    #[error("device disconnected: {0}")]
    Disconnected(String),

    #[error("I/O error: {0}")]
    Fatal(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),
}

impl DeviceIoError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DeviceIoError::Transient(_) => ErrorClass::Transient,
            DeviceIoError::Disconnected(_) => ErrorClass::Disconnected,
            DeviceIoError::Fatal(_) | DeviceIoError::Unsupported(_) => ErrorClass::Fatal,
        }
    }
}

impl From<std::io::Error> for DeviceIoError {
    fn from(err: std::io::Error) -> Self {
        match ErrorClassifier::classify_io(&err) {
            ErrorClass::Transient => DeviceIoError::Transient(err.to_string()),
            ErrorClass::Disconnected => DeviceIoError::Disconnected(err.to_string()),
            ErrorClass::Fatal => DeviceIoError::Fatal(err.to_string()),
        }
    }
}

pub type DeviceIoResult<T> = Result<T, DeviceIoError>;

/// Raw, addressable storage that a sanitization pass can be run against.
///
/// Offsets are absolute byte offsets from the start of the device. Implementations
/// must either write the whole buffer or return an error; partial writes are not
/// reported as success.
pub trait BlockDevice: Send {
    /// Full addressable size in bytes
    fn capacity(&self) -> u64;

    fn write_at(&mut self, offset: u64, data: &[u8]) -> DeviceIoResult<()>;

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> DeviceIoResult<()>;

    /// Flush volatile caches so written data is persisted
    fn sync(&mut self) -> DeviceIoResult<()>;

    /// Device-native secure erase (ATA SECURITY ERASE UNIT, NVMe Format)
    fn hardware_erase(&mut self) -> DeviceIoResult<()> {
        Err(DeviceIoError::Unsupported(
            "hardware secure erase not available on this device".to_string(),
        ))
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for Box<T> {
    fn capacity(&self) -> u64 {
        (**self).capacity()
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> DeviceIoResult<()> {
        (**self).write_at(offset, data)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> DeviceIoResult<()> {
        (**self).read_at(offset, buf)
    }

    fn sync(&mut self) -> DeviceIoResult<()> {
        (**self).sync()
    }

    fn hardware_erase(&mut self) -> DeviceIoResult<()> {
        (**self).hardware_erase()
    }
}
