/// Certificate issuance and verification: round trip, verdict ordering,
/// and tamper sensitivity over every attested field.

#[cfg(test)]
mod certificate_tests {
    use super::super::certificates::CERTIFICATE_VERSION;
    use super::super::*;
    use crate::executor::{EraseOperation, FailureCause, OperationState, Outcome};
    use crate::DriveError;
    use chrono::Duration;
    use proptest::prelude::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn finished(state: OperationState) -> EraseOperation {
        let mut op = EraseOperation::new("dev-1", "NIST-800-88", 1, 4096);
        op.transition(OperationState::Running);
        match state {
            OperationState::Failed => {
                op.fail(FailureCause::Disconnected {
                    pass: 0,
                    offset: 2048,
                    message: "gone".to_string(),
                });
            }
            other => {
                if other == OperationState::Succeeded {
                    op.passes_completed = 1;
                }
                op.transition(other);
            }
        }
        op
    }

    fn issuer() -> (CertificateIssuer, CertificateVerifier) {
        let key = Arc::new(SigningKey::generate().unwrap());
        let verifier = key.verifier();
        (CertificateIssuer::new(key), verifier)
    }

    #[test]
    fn test_issue_verify_round_trip() {
        let (issuer, verifier) = issuer();
        let op = finished(OperationState::Succeeded);
        let cert = issuer.issue(&op).unwrap();

        assert_eq!(cert.version, CERTIFICATE_VERSION);
        assert_eq!(cert.signature.algorithm, "Ed25519");
        assert_eq!(cert.operation.operation_id, op.operation_id);
        assert_eq!(cert.operation.outcome, Outcome::Succeeded);
        assert_eq!(cert.operation.passes_completed, 1);
        assert_eq!(verifier.verify(&cert), Verdict::Valid);

        let json = cert.to_json().unwrap();
        assert_eq!(verifier.verify_json(&json), Verdict::Valid);
        assert_eq!(Certificate::from_json(&json).unwrap(), cert);
    }

    #[test]
    fn test_failed_and_aborted_are_attestable() {
        let (issuer, verifier) = issuer();
        for (state, outcome) in [
            (OperationState::Failed, Outcome::Failed),
            (OperationState::Aborted, Outcome::Aborted),
        ] {
            let cert = issuer.issue(&finished(state)).unwrap();
            assert_eq!(cert.operation.outcome, outcome);
            assert!(verifier.verify(&cert).is_valid());
        }
    }

    #[test]
    fn test_issue_rejects_non_terminal() {
        let (issuer, _) = issuer();
        let mut op = EraseOperation::new("dev-1", "Zero", 1, 4096);
        assert!(matches!(issuer.issue(&op), Err(DriveError::NotTerminal(_))));

        op.transition(OperationState::Running);
        let before = op.clone();
        assert!(matches!(issuer.issue(&op), Err(DriveError::NotTerminal(_))));
        assert_eq!(op, before);
    }

    #[test]
    fn test_json_shape() {
        let (issuer, _) = issuer();
        let cert = issuer.issue(&finished(OperationState::Succeeded)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&cert.to_json().unwrap()).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(value["operation"]["outcome"], "Succeeded");
        assert_eq!(value["operation"]["passes_completed"], 1);
        assert_eq!(value["signature"]["algorithm"], "Ed25519");
        assert_eq!(value["signature"]["value"].as_str().unwrap().len(), 128);
        assert!(value["issued_at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_canonical_payload_excludes_signature() {
        let (issuer, _) = issuer();
        let cert = issuer.issue(&finished(OperationState::Succeeded)).unwrap();
        let payload = String::from_utf8(cert.canonical_payload().unwrap()).unwrap();

        assert!(payload.starts_with("{\"version\":1,\"certificate_id\":"));
        assert!(!payload.contains("signature"));

        let mut resigned = cert.clone();
        resigned.signature.value = "00".repeat(64);
        assert_eq!(resigned.canonical_payload().unwrap(), cert.canonical_payload().unwrap());
    }

    #[test]
    fn test_wrong_key_is_signature_mismatch() {
        let (issuer, _) = issuer();
        let (_, other_verifier) = self::issuer();
        let cert = issuer.issue(&finished(OperationState::Succeeded)).unwrap();
        assert_eq!(
            other_verifier.verify(&cert),
            Verdict::Invalid(InvalidReason::SignatureMismatch)
        );
    }

    #[test]
    fn test_unknown_algorithm_checked_first() {
        let (issuer, verifier) = issuer();
        let mut cert = issuer.issue(&finished(OperationState::Succeeded)).unwrap();
        cert.signature.algorithm = "RSA-PSS".to_string();
        cert.operation.device_id = "tampered".to_string();
        assert!(matches!(
            verifier.verify(&cert),
            Verdict::Invalid(InvalidReason::UnknownAlgorithm(_))
        ));

        let mut cert = issuer.issue(&finished(OperationState::Succeeded)).unwrap();
        cert.version = 2;
        assert!(matches!(
            verifier.verify(&cert),
            Verdict::Invalid(InvalidReason::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn test_verify_json_malformed_documents() {
        let (issuer, verifier) = issuer();
        let cert = issuer.issue(&finished(OperationState::Succeeded)).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&cert.to_json().unwrap()).unwrap();

        assert!(matches!(
            verifier.verify_json("{not json"),
            Verdict::Invalid(InvalidReason::MalformedPayload(_))
        ));

        value["version"] = serde_json::json!(7);
        assert!(matches!(
            verifier.verify_json(&value.to_string()),
            Verdict::Invalid(InvalidReason::UnknownAlgorithm(_))
        ));

        value["version"] = serde_json::json!(1);
        value["operation"]["outcome"] = serde_json::json!("Mostly");
        assert!(matches!(
            verifier.verify_json(&value.to_string()),
            Verdict::Invalid(InvalidReason::MalformedPayload(_))
        ));

        value["operation"]["outcome"] = serde_json::json!("Succeeded");
        value["operation"]
            .as_object_mut()
            .unwrap()
            .remove("device_id");
        assert!(matches!(
            verifier.verify_json(&value.to_string()),
            Verdict::Invalid(InvalidReason::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_structural_checks_after_signature() {
        let (issuer, verifier) = issuer();

        let mut op = finished(OperationState::Succeeded);
        op.device_id = String::new();
        let cert = issuer.issue(&op).unwrap();
        assert!(matches!(
            verifier.verify(&cert),
            Verdict::Invalid(InvalidReason::MalformedPayload(_))
        ));

        let mut op = finished(OperationState::Succeeded);
        op.ended_at = Some(op.started_at - Duration::seconds(1));
        let cert = issuer.issue(&op).unwrap();
        assert!(matches!(
            verifier.verify(&cert),
            Verdict::Invalid(InvalidReason::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cert.json");
        let (issuer, verifier) = issuer();
        let cert = issuer.issue(&finished(OperationState::Aborted)).unwrap();

        cert.save(&path).unwrap();
        let loaded = Certificate::load(&path).unwrap();
        assert_eq!(loaded, cert);
        assert!(verifier.verify(&loaded).is_valid());
    }

    #[test]
    fn test_verifier_from_hex() {
        let key = SigningKey::generate().unwrap();
        let verifier = CertificateVerifier::from_hex(&key.public_key_hex()).unwrap();
        let cert = CertificateIssuer::new(Arc::new(key))
            .issue(&finished(OperationState::Succeeded))
            .unwrap();
        assert!(verifier.verify(&cert).is_valid());

        assert!(matches!(CertificateVerifier::from_hex("zz"), Err(DriveError::Key(_))));
        assert!(matches!(CertificateVerifier::new(&[0u8; 16]), Err(DriveError::Key(_))));
    }

    #[test]
    fn test_every_document_byte_is_covered() {
        let (issuer, verifier) = issuer();
        let json = issuer
            .issue(&finished(OperationState::Succeeded))
            .unwrap()
            .to_json()
            .unwrap();
        assert_eq!(verifier.verify_json(&json), Verdict::Valid);

        let bytes = json.as_bytes();
        for i in 0..bytes.len() {
            let mut edited = bytes.to_vec();
            edited[i] ^= 0x01;
            let edited = String::from_utf8(edited).unwrap();
            assert!(
                !verifier.verify_json(&edited).is_valid(),
                "flipping byte {} ({:?}) still verifies",
                i,
                bytes[i] as char
            );
        }
    }

    #[test]
    fn test_signature_hex_case_is_significant() {
        let (issuer, verifier) = issuer();
        let cert = issuer.issue(&finished(OperationState::Succeeded)).unwrap();
        let json = cert.to_json().unwrap();

        let upper = cert.signature.value.to_uppercase();
        assert_ne!(upper, cert.signature.value);
        let edited = json.replace(&cert.signature.value, &upper);
        assert_eq!(
            verifier.verify_json(&edited),
            Verdict::Invalid(InvalidReason::SignatureMismatch)
        );

        let mut typed = cert.clone();
        typed.signature.value = upper;
        assert_eq!(
            verifier.verify(&typed),
            Verdict::Invalid(InvalidReason::SignatureMismatch)
        );
    }

    #[test]
    fn test_timestamp_spelling_is_significant() {
        let (issuer, verifier) = issuer();
        let cert = issuer.issue(&finished(OperationState::Succeeded)).unwrap();
        let json = cert.to_json().unwrap();
        let issued = certificates::rfc3339_nanos::format(&cert.issued_at);

        let variants = [
            issued.replace('Z', "z"),
            issued.replace('T', "t"),
            issued.replace('Z', "+00:00"),
        ];
        for variant in variants {
            assert_ne!(variant, issued);
            let edited = json.replace(&issued, &variant);
            assert_ne!(edited, json);
            assert!(
                matches!(
                    verifier.verify_json(&edited),
                    Verdict::Invalid(InvalidReason::MalformedPayload(_))
                ),
                "{} accepted",
                variant
            );
        }
    }

    /// Replace one attested field with a different value
    #[derive(Debug, Clone)]
    enum Tamper {
        OperationId(String),
        DeviceId(String),
        MethodId(String),
        Outcome(usize),
        StartedAtNanos(i64),
        EndedAtNanos(i64),
        IssuedAtNanos(i64),
        PassesCompleted(usize),
        CertificateId(String),
        SignatureBit(usize, u8),
    }

    fn tamper_strategy() -> impl Strategy<Value = Tamper> {
        prop_oneof![
            "[a-z0-9-]{1,36}".prop_map(Tamper::OperationId),
            "[a-z0-9-]{1,24}".prop_map(Tamper::DeviceId),
            "[A-Za-z0-9.-]{1,16}".prop_map(Tamper::MethodId),
            (1usize..3).prop_map(Tamper::Outcome),
            (-1_000_000_000i64..-1).prop_map(Tamper::StartedAtNanos),
            (1i64..1_000_000_000).prop_map(Tamper::EndedAtNanos),
            (1i64..1_000_000_000).prop_map(Tamper::IssuedAtNanos),
            (2usize..64).prop_map(Tamper::PassesCompleted),
            "[a-f0-9-]{1,36}".prop_map(Tamper::CertificateId),
            (0usize..64, 0u8..8).prop_map(|(byte, bit)| Tamper::SignatureBit(byte, bit)),
        ]
    }

    fn apply(cert: &mut Certificate, tamper: &Tamper) -> bool {
        const OUTCOMES: [Outcome; 3] = [Outcome::Succeeded, Outcome::Failed, Outcome::Aborted];
        let op = &mut cert.operation;
        match tamper {
            Tamper::OperationId(v) if *v != op.operation_id => op.operation_id = v.clone(),
            Tamper::DeviceId(v) if *v != op.device_id => op.device_id = v.clone(),
            Tamper::MethodId(v) if *v != op.method_id => op.method_id = v.clone(),
            Tamper::Outcome(shift) => {
                let current = OUTCOMES.iter().position(|o| *o == op.outcome).unwrap_or(0);
                op.outcome = OUTCOMES[(current + shift) % 3];
            }
            Tamper::StartedAtNanos(n) => op.started_at += Duration::nanoseconds(*n),
            Tamper::EndedAtNanos(n) => op.ended_at += Duration::nanoseconds(*n),
            Tamper::IssuedAtNanos(n) => cert.issued_at += Duration::nanoseconds(*n),
            Tamper::PassesCompleted(n) => op.passes_completed = *n,
            Tamper::CertificateId(v) if *v != cert.certificate_id => {
                cert.certificate_id = v.clone()
            }
            Tamper::SignatureBit(byte, bit) => {
                let mut raw = hex::decode(&cert.signature.value).unwrap();
                raw[*byte] ^= 1 << bit;
                cert.signature.value = hex::encode(raw);
            }
            _ => return false,
        }
        true
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_any_tampered_field_invalidates(tamper in tamper_strategy()) {
            let (issuer, verifier) = issuer();
            let original = issuer.issue(&finished(OperationState::Succeeded)).unwrap();

            let mut cert = original.clone();
            prop_assume!(apply(&mut cert, &tamper));
            prop_assert_ne!(&cert, &original);

            prop_assert_eq!(
                verifier.verify(&cert),
                Verdict::Invalid(InvalidReason::SignatureMismatch)
            );

            // Same result through the document path
            let json = cert.to_json().unwrap();
            prop_assert_eq!(
                verifier.verify_json(&json),
                Verdict::Invalid(InvalidReason::SignatureMismatch)
            );
        }
    }
}
