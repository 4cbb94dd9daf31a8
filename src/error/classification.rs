/// Device I/O error classification
///
/// Every error raised while writing or reading back a chunk is classified into
/// one of three classes. The class alone decides what the executor does next:
/// transient errors are retried a bounded number of times, a disconnect ends the
/// operation immediately, and anything else fails the pass without retry.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Classification of device I/O errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// May succeed on retry (EIO on a marginal sector, EAGAIN, timeouts)
    Transient,

    /// The device is gone. Never retried, never resumed
    Disconnected,

    /// Will not resolve by retrying (read-only media, EACCES, ENOSPC)
    Fatal,
}

impl ErrorClass {
    pub fn description(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "Temporary error that may resolve on retry",
            ErrorClass::Disconnected => "Device disconnected during operation",
            ErrorClass::Fatal => "Unrecoverable error requiring abort",
        }
    }

    /// Check if this error class allows retries
    pub fn allows_retry(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "Transient"),
            ErrorClass::Disconnected => write!(f, "Disconnected"),
            ErrorClass::Fatal => write!(f, "Fatal"),
        }
    }
}

/// Context information about where and when an error occurred
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Operation name (e.g., "write_chunk", "verify_chunk")
    pub operation: String,

    pub device_id: String,

    /// Byte offset where error occurred (if applicable)
    pub offset: Option<u64>,

    pub timestamp: DateTime<Utc>,

    /// Additional metadata (method, pass number, attempt)
    pub metadata: HashMap<String, String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            device_id: device_id.into(),
            offset: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Create context for a specific pass operation
    pub fn for_pass(device_id: impl Into<String>, method_id: &str, pass: usize) -> Self {
        let mut ctx = Self::new(format!("{}_pass_{}", method_id, pass), device_id);
        ctx.metadata
            .insert("method".to_string(), method_id.to_string());
        ctx.metadata.insert("pass".to_string(), pass.to_string());
        ctx
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(
                f,
                "{} on {} at offset {}",
                self.operation, self.device_id, offset
            ),
            None => write!(f, "{} on {}", self.operation, self.device_id),
        }
    }
}

/// Error classifier for `std::io::Error`
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify by raw OS errno first, then by `ErrorKind`
    pub fn classify_io(error: &std::io::Error) -> ErrorClass {
        if let Some(errno) = error.raw_os_error() {
            if let Some(class) = Self::classify_errno(errno) {
                return class;
            }
        }

        use std::io::ErrorKind;
        match error.kind() {
            ErrorKind::Interrupted => ErrorClass::Transient,
            ErrorKind::WouldBlock => ErrorClass::Transient,
            ErrorKind::TimedOut => ErrorClass::Transient,

            ErrorKind::NotFound => ErrorClass::Disconnected,
            ErrorKind::NotConnected => ErrorClass::Disconnected,
            ErrorKind::BrokenPipe => ErrorClass::Disconnected,
            ErrorKind::ConnectionReset => ErrorClass::Disconnected,
            ErrorKind::ConnectionAborted => ErrorClass::Disconnected,

            // Short writes/reads against a block device usually mean the
            // medium shrank underneath us
            ErrorKind::UnexpectedEof => ErrorClass::Disconnected,
            ErrorKind::WriteZero => ErrorClass::Disconnected,

            _ => ErrorClass::Fatal,
        }
    }

    fn classify_errno(errno: i32) -> Option<ErrorClass> {
        match errno {
            libc::EIO | libc::EAGAIN | libc::EINTR | libc::EBUSY | libc::ETIMEDOUT => {
                Some(ErrorClass::Transient)
            }
            libc::ENODEV | libc::ENXIO | libc::ENOENT | libc::ESHUTDOWN | libc::ENOMEDIUM => {
                Some(ErrorClass::Disconnected)
            }
            libc::EROFS | libc::EACCES | libc::EPERM | libc::ENOSPC | libc::EINVAL => {
                Some(ErrorClass::Fatal)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_error_class_allows_retry() {
        assert!(ErrorClass::Transient.allows_retry());
        assert!(!ErrorClass::Disconnected.allows_retry());
        assert!(!ErrorClass::Fatal.allows_retry());
    }

    #[test]
    fn test_classify_errno_transient() {
        for errno in [libc::EIO, libc::EAGAIN, libc::EINTR, libc::EBUSY] {
            let err = Error::from_raw_os_error(errno);
            assert_eq!(ErrorClassifier::classify_io(&err), ErrorClass::Transient);
        }
    }

    #[test]
    fn test_classify_errno_disconnected() {
        for errno in [libc::ENODEV, libc::ENXIO, libc::ENOENT, libc::ENOMEDIUM] {
            let err = Error::from_raw_os_error(errno);
            assert_eq!(ErrorClassifier::classify_io(&err), ErrorClass::Disconnected);
        }
    }

    #[test]
    fn test_classify_errno_fatal() {
        for errno in [libc::EROFS, libc::EACCES, libc::ENOSPC] {
            let err = Error::from_raw_os_error(errno);
            assert_eq!(ErrorClassifier::classify_io(&err), ErrorClass::Fatal);
        }
    }

    #[test]
    fn test_classify_error_kind_fallback() {
        assert_eq!(
            ErrorClassifier::classify_io(&Error::new(ErrorKind::TimedOut, "slow")),
            ErrorClass::Transient
        );
        assert_eq!(
            ErrorClassifier::classify_io(&Error::new(ErrorKind::BrokenPipe, "gone")),
            ErrorClass::Disconnected
        );
        assert_eq!(
            ErrorClassifier::classify_io(&Error::new(ErrorKind::InvalidData, "bad")),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_error_context_for_pass() {
        let ctx = ErrorContext::for_pass("dev-1", "DoD-5220.22-M", 2).with_offset(4096);
        assert_eq!(ctx.operation, "DoD-5220.22-M_pass_2");
        assert_eq!(ctx.metadata.get("pass"), Some(&"2".to_string()));
        assert_eq!(ctx.to_string(), "DoD-5220.22-M_pass_2 on dev-1 at offset 4096");
    }
}
