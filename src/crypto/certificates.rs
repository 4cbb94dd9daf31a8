use super::keys::SigningKey;
use crate::executor::{EraseOperation, Outcome};
use crate::{DriveError, DriveResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub const CERTIFICATE_VERSION: u32 = 1;
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

/// Timestamps are always written as RFC 3339 UTC with nanoseconds, so the
/// document and the signed payload agree byte for byte
pub(crate) mod rfc3339_nanos {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    /// Only the exact form `format` produces is accepted. Any other spelling
    /// of the same instant (lowercase `t`/`z`, an offset, fewer digits) would
    /// re-serialize to the signed bytes and hide an edit.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        let value = DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)?;
        if format(&value) != text {
            return Err(serde::de::Error::custom(format!(
                "timestamp {:?} is not in canonical form",
                text
            )));
        }
        Ok(value)
    }
}

/// Facts copied from one terminal operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestedOperation {
    pub operation_id: String,
    pub device_id: String,
    pub method_id: String,
    pub outcome: Outcome,
    #[serde(with = "rfc3339_nanos")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "rfc3339_nanos")]
    pub ended_at: DateTime<Utc>,
    pub passes_completed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBlock {
    pub algorithm: String,
    /// Hex-encoded signature over the canonical payload
    pub value: String,
}

/// Signed statement that an erase operation ended with a given outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub version: u32,
    pub certificate_id: String,
    #[serde(with = "rfc3339_nanos")]
    pub issued_at: DateTime<Utc>,
    pub operation: AttestedOperation,
    pub signature: SignatureBlock,
}

// Field order here is the canonical order; do not reorder
#[derive(Serialize)]
struct CanonicalPayload<'a> {
    version: u32,
    certificate_id: &'a str,
    issued_at: String,
    operation: CanonicalOperation<'a>,
}

#[derive(Serialize)]
struct CanonicalOperation<'a> {
    operation_id: &'a str,
    device_id: &'a str,
    method_id: &'a str,
    outcome: &'a str,
    started_at: String,
    ended_at: String,
    passes_completed: usize,
}

impl Certificate {
    /// The exact bytes the signature covers: every field except the signature
    /// block, as compact JSON in a fixed field order
    pub fn canonical_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        let op = &self.operation;
        serde_json::to_vec(&CanonicalPayload {
            version: self.version,
            certificate_id: &self.certificate_id,
            issued_at: rfc3339_nanos::format(&self.issued_at),
            operation: CanonicalOperation {
                operation_id: &op.operation_id,
                device_id: &op.device_id,
                method_id: &op.method_id,
                outcome: op.outcome.as_str(),
                started_at: rfc3339_nanos::format(&op.started_at),
                ended_at: rfc3339_nanos::format(&op.ended_at),
                passes_completed: op.passes_completed,
            },
        })
    }

    pub fn to_json(&self) -> DriveResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> DriveResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> DriveResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> DriveResult<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// Signs certificates for terminal operations
pub struct CertificateIssuer {
    key: Arc<SigningKey>,
}

impl CertificateIssuer {
    pub fn new(key: Arc<SigningKey>) -> Self {
        Self { key }
    }

    pub fn public_key_hex(&self) -> String {
        self.key.public_key_hex()
    }

    /// Attest a terminal operation. The operation itself is not modified.
    pub fn issue(&self, operation: &EraseOperation) -> DriveResult<Certificate> {
        let (outcome, ended_at) = match (operation.outcome(), operation.ended_at) {
            (Some(outcome), Some(ended_at)) => (outcome, ended_at),
            _ => return Err(DriveError::NotTerminal(operation.operation_id.clone())),
        };

        let mut certificate = Certificate {
            version: CERTIFICATE_VERSION,
            certificate_id: Uuid::new_v4().to_string(),
            issued_at: Utc::now(),
            operation: AttestedOperation {
                operation_id: operation.operation_id.clone(),
                device_id: operation.device_id.clone(),
                method_id: operation.method_id.clone(),
                outcome,
                started_at: operation.started_at,
                ended_at,
                passes_completed: operation.passes_completed,
            },
            signature: SignatureBlock {
                algorithm: SIGNATURE_ALGORITHM.to_string(),
                value: String::new(),
            },
        };

        let payload = certificate.canonical_payload()?;
        certificate.signature.value = hex::encode(self.key.sign(&payload));

        tracing::info!(
            certificate_id = %certificate.certificate_id,
            operation_id = %operation.operation_id,
            device_id = %operation.device_id,
            outcome = %outcome,
            issued_at = %certificate.issued_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            "certificate issued"
        );

        Ok(certificate)
    }
}
