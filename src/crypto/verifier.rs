use super::certificates::{Certificate, CERTIFICATE_VERSION, SIGNATURE_ALGORITHM};
use crate::{DriveError, DriveResult};
use ring::signature::{UnparsedPublicKey, ED25519};
use std::fmt;

const ED25519_PUBLIC_KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// Signature does not cover the presented facts under this key
    SignatureMismatch,
    /// Document cannot be read, or signed facts are structurally impossible
    MalformedPayload(String),
    /// Certificate version or signature algorithm this verifier does not know
    UnknownAlgorithm(String),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::SignatureMismatch => write!(f, "signature mismatch"),
            InvalidReason::MalformedPayload(detail) => write!(f, "malformed payload: {}", detail),
            InvalidReason::UnknownAlgorithm(detail) => write!(f, "unknown algorithm: {}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(InvalidReason),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Valid => write!(f, "valid"),
            Verdict::Invalid(reason) => write!(f, "invalid ({})", reason),
        }
    }
}

/// Checks certificates against an Ed25519 public key. Holds no other state.
#[derive(Debug, Clone)]
pub struct CertificateVerifier {
    public_key: Vec<u8>,
}

impl CertificateVerifier {
    pub fn new(public_key: &[u8]) -> DriveResult<Self> {
        if public_key.len() != ED25519_PUBLIC_KEY_LEN {
            return Err(DriveError::Key(format!(
                "Ed25519 public key must be {} bytes, got {}",
                ED25519_PUBLIC_KEY_LEN,
                public_key.len()
            )));
        }
        Ok(Self::from_public_key(public_key.to_vec()))
    }

    pub fn from_hex(public_key: &str) -> DriveResult<Self> {
        let bytes = hex::decode(public_key.trim())
            .map_err(|e| DriveError::Key(format!("public key is not hex: {}", e)))?;
        Self::new(&bytes)
    }

    pub(crate) fn from_public_key(public_key: Vec<u8>) -> Self {
        Self { public_key }
    }

    /// Version and algorithm first, then the signature over the recomputed
    /// payload, then structural checks on the signed facts
    pub fn verify(&self, certificate: &Certificate) -> Verdict {
        if certificate.version != CERTIFICATE_VERSION {
            return Verdict::Invalid(InvalidReason::UnknownAlgorithm(format!(
                "certificate version {}",
                certificate.version
            )));
        }
        if certificate.signature.algorithm != SIGNATURE_ALGORITHM {
            return Verdict::Invalid(InvalidReason::UnknownAlgorithm(
                certificate.signature.algorithm.clone(),
            ));
        }

        let payload = match certificate.canonical_payload() {
            Ok(payload) => payload,
            Err(e) => return Verdict::Invalid(InvalidReason::MalformedPayload(e.to_string())),
        };

        // Lowercase hex only, so the signature has exactly one textual form
        let signature = match hex::decode(&certificate.signature.value) {
            Ok(signature) if hex::encode(&signature) == certificate.signature.value => signature,
            _ => return Verdict::Invalid(InvalidReason::SignatureMismatch),
        };

        if UnparsedPublicKey::new(&ED25519, &self.public_key)
            .verify(&payload, &signature)
            .is_err()
        {
            return Verdict::Invalid(InvalidReason::SignatureMismatch);
        }

        match Self::check_structure(certificate) {
            Ok(()) => Verdict::Valid,
            Err(detail) => Verdict::Invalid(InvalidReason::MalformedPayload(detail)),
        }
    }

    /// Verify a certificate document as read from disk or the wire
    pub fn verify_json(&self, text: &str) -> Verdict {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => return Verdict::Invalid(InvalidReason::MalformedPayload(e.to_string())),
        };

        match value.get("version").and_then(|v| v.as_u64()) {
            Some(version) if version == u64::from(CERTIFICATE_VERSION) => {}
            Some(version) => {
                return Verdict::Invalid(InvalidReason::UnknownAlgorithm(format!(
                    "certificate version {}",
                    version
                )))
            }
            None => {
                return Verdict::Invalid(InvalidReason::MalformedPayload(
                    "missing or non-numeric version".to_string(),
                ))
            }
        }

        match serde_json::from_value::<Certificate>(value) {
            Ok(certificate) => self.verify(&certificate),
            Err(e) => Verdict::Invalid(InvalidReason::MalformedPayload(e.to_string())),
        }
    }

    fn check_structure(certificate: &Certificate) -> Result<(), String> {
        let op = &certificate.operation;
        let required = [
            ("certificate_id", certificate.certificate_id.as_str()),
            ("operation_id", op.operation_id.as_str()),
            ("device_id", op.device_id.as_str()),
            ("method_id", op.method_id.as_str()),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(format!("{} is empty", field));
        }
        if op.ended_at < op.started_at {
            return Err("ended_at precedes started_at".to_string());
        }
        Ok(())
    }
}
