// Attestation: Ed25519 signing keys, certificate issuance and verification

pub mod certificates;
pub mod keys;
pub mod verifier;

#[cfg(test)]
mod certificates_tests;

pub use certificates::{AttestedOperation, Certificate, CertificateIssuer, SignatureBlock};
pub use keys::SigningKey;
pub use verifier::{CertificateVerifier, InvalidReason, Verdict};
