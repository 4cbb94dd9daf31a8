use super::gutmann::gutmann;
use super::{PassSpec, Pattern, SanitizationMethod};
use crate::{DeviceDescriptor, DriveError, DriveResult};
use std::collections::BTreeMap;

/// Static table of sanitization methods, keyed by method id
#[derive(Debug, Clone)]
pub struct MethodRegistry {
    methods: BTreeMap<String, SanitizationMethod>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl MethodRegistry {
    /// Registry with no methods at all
    pub fn empty() -> Self {
        Self {
            methods: BTreeMap::new(),
        }
    }

    /// Registry holding the built-in methods
    pub fn builtin() -> Self {
        let mut methods = BTreeMap::new();
        for method in [
            nist_800_88(),
            dod_5220_22_m(),
            gutmann(),
            ata_secure_erase(),
            zero(),
            random(),
        ] {
            methods.insert(method.id.clone(), method);
        }
        Self { methods }
    }

    /// Add a custom method. Ids are unique; built-ins cannot be replaced.
    pub fn register(&mut self, method: SanitizationMethod) -> DriveResult<()> {
        if method.id.trim().is_empty() {
            return Err(DriveError::InvalidMethod("method id is empty".to_string()));
        }
        if method.passes.is_empty() {
            return Err(DriveError::InvalidMethod(format!(
                "{} has no passes",
                method.id
            )));
        }
        if method.passes[0].pattern == Pattern::Complement {
            return Err(DriveError::InvalidMethod(format!(
                "{}: first pass cannot be a complement of a previous pass",
                method.id
            )));
        }
        for (i, pair) in method.passes.windows(2).enumerate() {
            if pair[1].pattern == Pattern::Complement && pair[0].pattern == Pattern::Hardware {
                return Err(DriveError::InvalidMethod(format!(
                    "{}: pass {} complements a hardware erase",
                    method.id,
                    i + 2
                )));
            }
        }
        // Native erase content is vendor-defined, there is nothing to read back against
        if let Some(i) = method
            .passes
            .iter()
            .position(|p| p.pattern == Pattern::Hardware && p.verify)
        {
            return Err(DriveError::InvalidMethod(format!(
                "{}: pass {} requests verification of a hardware erase",
                method.id,
                i + 1
            )));
        }
        if method
            .passes
            .iter()
            .any(|p| matches!(&p.pattern, Pattern::Fixed(bytes) if bytes.is_empty()))
        {
            return Err(DriveError::InvalidMethod(format!(
                "{}: fixed pattern is empty",
                method.id
            )));
        }
        if self.methods.contains_key(&method.id) {
            return Err(DriveError::InvalidMethod(format!(
                "{} is already registered",
                method.id
            )));
        }

        tracing::debug!(
            method = %method.id,
            passes = method.passes.len(),
            "registered sanitization method"
        );
        self.methods.insert(method.id.clone(), method);
        Ok(())
    }

    pub fn resolve(&self, method_id: &str) -> DriveResult<&SanitizationMethod> {
        self.methods
            .get(method_id)
            .ok_or_else(|| DriveError::UnknownMethod(method_id.to_string()))
    }

    /// Check the method's precondition against a device before anything is written
    pub fn validate(
        &self,
        method: &SanitizationMethod,
        device: &DeviceDescriptor,
    ) -> DriveResult<()> {
        let mismatch = |reason: String| DriveError::CapabilityMismatch {
            method_id: method.id.clone(),
            device_id: device.device_id.clone(),
            reason,
        };

        if device.capacity_bytes == 0 {
            return Err(mismatch("device reports zero capacity".to_string()));
        }

        // The overwrite range would stop at the reduced size and leave the hidden sectors intact
        if device.has_host_protected_area || device.has_device_configuration_overlay {
            let area = match (
                device.has_host_protected_area,
                device.has_device_configuration_overlay,
            ) {
                (true, true) => "HPA and DCO",
                (true, false) => "HPA",
                _ => "DCO",
            };
            return Err(mismatch(format!("hidden area present ({})", area)));
        }

        if method.requires_hardware_erase() && !device.supports_hardware_secure_erase {
            return Err(mismatch(format!(
                "{} device does not support hardware secure erase",
                device.device_type
            )));
        }

        Ok(())
    }

    /// All methods, ordered by id
    pub fn list(&self) -> Vec<&SanitizationMethod> {
        self.methods.values().collect()
    }
}

/// NIST SP 800-88 Clear: one verified pseudorandom overwrite
pub fn nist_800_88() -> SanitizationMethod {
    SanitizationMethod::new(
        "NIST-800-88",
        "NIST SP 800-88 Clear",
        vec![PassSpec::verified(Pattern::Random)],
    )
}

/// DoD 5220.22-M: zeros, their complement, then verified random
pub fn dod_5220_22_m() -> SanitizationMethod {
    SanitizationMethod::new(
        "DoD-5220.22-M",
        "DoD 5220.22-M 3-pass",
        vec![
            PassSpec::new(Pattern::Zero),
            PassSpec::new(Pattern::Complement),
            PassSpec::verified(Pattern::Random),
        ],
    )
}

pub fn ata_secure_erase() -> SanitizationMethod {
    SanitizationMethod::new(
        "ATA-Secure-Erase",
        "Hardware secure erase",
        vec![PassSpec::new(Pattern::Hardware)],
    )
}

pub fn zero() -> SanitizationMethod {
    SanitizationMethod::new(
        "Zero",
        "Single-pass zero fill",
        vec![PassSpec::verified(Pattern::Zero)],
    )
}

pub fn random() -> SanitizationMethod {
    SanitizationMethod::new(
        "Random",
        "Single-pass random fill",
        vec![PassSpec::verified(Pattern::Random)],
    )
}
