//! Sanitization methods: what gets written, in which order, and on which devices.
//!
//! A method is pure data. The executor turns each [`PassSpec`] into a
//! [`PatternFiller`] and streams it across the device.

pub mod gutmann;
pub mod pattern;
pub mod registry;


pub use pattern::PatternFiller;
pub use registry::MethodRegistry;

use serde::{Deserialize, Serialize};

/// Content generator for one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pattern {
    /// 0x00
    Zero,
    /// 0xFF
    One,
    /// CSPRNG output, reproducible within the pass for read-back
    Random,
    /// Bitwise inverse of whatever the previous pass wrote
    Complement,
    /// Byte sequence repeated from offset zero
    Fixed(Vec<u8>),
    /// Device-native secure erase (ATA SECURITY ERASE UNIT / NVMe Format)
    Hardware,
}

impl Pattern {
    pub fn describe(&self) -> String {
        match self {
            Pattern::Zero => "zero-fill".to_string(),
            Pattern::One => "one-fill".to_string(),
            Pattern::Random => "pseudorandom".to_string(),
            Pattern::Complement => "complement of previous".to_string(),
            Pattern::Fixed(bytes) => {
                let hex: Vec<String> = bytes.iter().map(|b| format!("{:02X}", b)).collect();
                format!("fixed 0x{}", hex.join(" 0x"))
            }
            Pattern::Hardware => "hardware secure erase".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSpec {
    pub pattern: Pattern,
    /// Read back and compare after the pass is written
    pub verify: bool,
}

impl PassSpec {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            verify: false,
        }
    }

    pub fn verified(pattern: Pattern) -> Self {
        Self {
            pattern,
            verify: true,
        }
    }
}

/// Device capability a method depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Requirement {
    None,
    HardwareSecureErase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizationMethod {
    pub id: String,
    pub name: String,
    pub passes: Vec<PassSpec>,
    pub requirement: Requirement,
}

impl SanitizationMethod {
    pub fn new(id: impl Into<String>, name: impl Into<String>, passes: Vec<PassSpec>) -> Self {
        let requirement = if passes.iter().any(|p| p.pattern == Pattern::Hardware) {
            Requirement::HardwareSecureErase
        } else {
            Requirement::None
        };

        Self {
            id: id.into(),
            name: name.into(),
            passes,
            requirement,
        }
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn requires_hardware_erase(&self) -> bool {
        self.requirement == Requirement::HardwareSecureErase
            || self.passes.iter().any(|p| p.pattern == Pattern::Hardware)
    }
}
