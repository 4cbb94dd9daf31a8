/// Error handling support for the erase engine
///
/// The public error type is [`crate::DriveError`]. This module holds the pieces
/// the executor uses while a wipe is in flight:
/// - classification of device I/O errors (transient / disconnected / fatal)
/// - bounded retry strategies with exponential backoff and jitter
///
/// ```text
/// chunk write ──► DeviceIoError ──► ErrorClass ──► RetryStrategy
///                                        │
///                     Disconnected/Fatal └──► FailureCause recorded on the operation
/// ```
pub mod classification;
pub mod retry;

pub use classification::{ErrorClass, ErrorClassifier, ErrorContext};
pub use retry::{ExponentialBackoff, NoRetry, RetryStrategy};
