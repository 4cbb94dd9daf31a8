// Allow uppercase acronyms for industry-standard terms like HDD, SSD, EMMC
#![allow(clippy::upper_case_acronyms)]

pub mod algorithms;
pub mod config;
pub mod crypto;
pub mod drives;
pub mod error;
pub mod executor;
pub mod io;
pub mod journal;
pub mod logging;

// Re-export the engine entry points for convenience
pub use algorithms::{MethodRegistry, PassSpec, Pattern, SanitizationMethod};
pub use crypto::{
    Certificate, CertificateIssuer, CertificateVerifier, InvalidReason, SigningKey, Verdict,
};
pub use drives::{DeviceBackend, DeviceInventory};
pub use executor::{EraseExecutor, EraseOperation, FailureCause, OperationState, Outcome};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Engine error taxonomy. Precondition violations are returned synchronously;
// failures during execution are recorded on the operation instead.
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("Device scan failed: {0}")]
    ScanError(String),

    #[error("Unknown sanitization method: {0}")]
    UnknownMethod(String),

    #[error("Invalid sanitization method: {0}")]
    InvalidMethod(String),

    #[error("Method {method_id} cannot run on {device_id}: {reason}")]
    CapabilityMismatch {
        method_id: String,
        device_id: String,
        reason: String,
    },

    #[error("Device {device_id} is busy with operation {operation_id}")]
    DeviceBusy {
        device_id: String,
        operation_id: String,
    },

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Device disconnected: {0}")]
    DeviceDisconnected(String),

    #[error("Operation {0} has not reached a terminal state")]
    NotTerminal(String),

    #[error("Insufficient permissions: {0}")]
    PermissionDenied(String),

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Signing key error: {0}")]
    Key(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DriveError {
    /// Whether the caller may retry the same request later without changing it
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriveError::ScanError(_) | DriveError::DeviceBusy { .. })
    }
}

pub type DriveResult<T> = Result<T, DriveError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeviceType {
    SSD,
    HDD,
    NVMe,
    #[serde(rename = "eMMC")]
    EMMC,
    Other,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceType::SSD => "SSD",
            DeviceType::HDD => "HDD",
            DeviceType::NVMe => "NVMe",
            DeviceType::EMMC => "eMMC",
            DeviceType::Other => "Other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub temperature_celsius: Option<u32>,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            temperature_celsius: None,
        }
    }
}

/// Sanitization-relevant view of one physical device, as of a single scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceDescriptor {
    /// Stable identity, derived from model and serial when available
    pub device_id: String,
    pub path: String,
    pub model: String,
    pub serial: Option<String>,
    pub device_type: DeviceType,
    pub capacity_bytes: u64,
    pub interface: String,
    pub supports_hardware_secure_erase: bool,
    pub is_encrypted: bool,
    pub has_host_protected_area: bool,
    pub has_device_configuration_overlay: bool,
    pub health: HealthSnapshot,
}
