//! Certificate lifecycle across process boundaries: persisted keys, journaled
//! operations recovered after a restart, and certificate files edited on disk.
#[path = "common/mod.rs"]
mod common;

use common::test_helpers::*;
use sayonara_engine::drives::{FaultPlan, SimulatedBackend};
use sayonara_engine::journal::OperationJournal;
use sayonara_engine::{
    Certificate, CertificateIssuer, CertificateVerifier, DeviceType, EraseOperation, FailureCause,
    InvalidReason, OperationState, Outcome, SigningKey, Verdict,
};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread")]
async fn test_certificate_file_verifies_with_persisted_key() {
    let dir = TempDir::new().unwrap();
    let key_path = dir.path().join("keys").join("signing_key.pk8");
    let cert_path = dir.path().join("cert.json");

    let (_backend, executor) = simulated(&["dev-1"]);
    let id = executor.begin("dev-1", "Zero").unwrap();
    let op = wait_terminal(&executor, &id).await;

    let key = Arc::new(SigningKey::load_or_generate(&key_path).unwrap());
    let public_hex = key.public_key_hex();
    CertificateIssuer::new(key).issue(&op).unwrap().save(&cert_path).unwrap();

    // Another process: reload the same key, or only know its public half
    let reloaded = SigningKey::load_or_generate(&key_path).unwrap();
    assert_eq!(reloaded.public_key_hex(), public_hex);

    let verifier = CertificateVerifier::from_hex(&public_hex).unwrap();
    let json = fs::read_to_string(&cert_path).unwrap();
    assert_eq!(verifier.verify_json(&json), Verdict::Valid);
    assert_eq!(reloaded.verifier().verify_json(&json), Verdict::Valid);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_edited_certificate_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let cert_path = dir.path().join("cert.json");

    let (_backend, executor) = simulated(&["dev-1"]);
    let id = executor.begin("dev-1", "NIST-800-88").unwrap();
    let op = wait_terminal(&executor, &id).await;

    let key = Arc::new(SigningKey::generate().unwrap());
    let verifier = key.verifier();
    let cert = CertificateIssuer::new(key).issue(&op).unwrap();
    cert.save(&cert_path).unwrap();

    let edited = fs::read_to_string(&cert_path)
        .unwrap()
        .replace("\"dev-1\"", "\"dev-2\"");
    fs::write(&cert_path, &edited).unwrap();

    assert_eq!(
        verifier.verify_json(&edited),
        Verdict::Invalid(InvalidReason::SignatureMismatch)
    );
    let loaded = Certificate::load(&cert_path).unwrap();
    assert_eq!(loaded.operation.device_id, "dev-2");
    assert!(!verifier.verify(&loaded).is_valid());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interrupted_operation_attested_after_restart() {
    let dir = TempDir::new().unwrap();
    let journal_path = dir.path().join("journal.db");

    // Previous process died in the middle of pass 2
    let stale_id = {
        let mut journal = OperationJournal::open(&journal_path).unwrap();
        let mut op = EraseOperation::new("dev-1", "DoD-5220.22-M", 3, SIM_CAPACITY);
        op.transition(OperationState::Running);
        op.passes_completed = 1;
        op.progress.pass_index = 1;
        journal.record(&op).unwrap();
        op.operation_id
    };

    let backend = Arc::new(SimulatedBackend::new());
    backend.add_device(SimulatedBackend::descriptor("dev-1", DeviceType::HDD, SIM_CAPACITY));
    let executor = engine_with_journal(backend, OperationJournal::open(&journal_path).unwrap());

    let op = executor.status(&stale_id).unwrap();
    assert_eq!(op.state, OperationState::Failed);
    assert_eq!(op.failure, Some(FailureCause::Interrupted));
    assert!(op.ended_at.is_some());

    let key = Arc::new(SigningKey::generate().unwrap());
    let verifier = key.verifier();
    let cert = CertificateIssuer::new(key).issue(&op).unwrap();
    assert_eq!(cert.operation.outcome, Outcome::Failed);
    assert_eq!(cert.operation.passes_completed, 1);
    assert!(verifier.verify(&cert).is_valid());

    // The device is free again after recovery
    let id = executor.begin("dev-1", "Zero").unwrap();
    assert_eq!(wait_terminal(&executor, &id).await.state, OperationState::Succeeded);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_journal_keeps_terminal_records_for_later_attestation() {
    let dir = TempDir::new().unwrap();
    let journal_path = dir.path().join("journal.db");

    let finished = {
        let backend = Arc::new(SimulatedBackend::new());
        backend.add_device(SimulatedBackend::descriptor("dev-1", DeviceType::SSD, SIM_CAPACITY));
        let executor =
            engine_with_journal(backend, OperationJournal::open(&journal_path).unwrap());
        let id = executor.begin("dev-1", "Random").unwrap();
        let op = wait_terminal(&executor, &id).await;
        executor.shutdown().await;
        op
    };

    let journal = OperationJournal::open(&journal_path).unwrap();
    let loaded = journal.load(&finished.operation_id).unwrap().unwrap();
    assert_eq!(loaded.state, OperationState::Succeeded);
    assert_eq!(loaded.ended_at, finished.ended_at);

    let key = Arc::new(SigningKey::generate().unwrap());
    let verifier = key.verifier();
    let cert = CertificateIssuer::new(key).issue(&loaded).unwrap();
    assert_eq!(cert.operation.started_at, finished.started_at);
    assert_eq!(verifier.verify(&cert), Verdict::Valid);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_live_journal_cannot_be_opened_by_a_second_engine() {
    let dir = TempDir::new().unwrap();
    let journal_path = dir.path().join("journal.db");

    let backend = Arc::new(SimulatedBackend::new());
    backend.add_device(SimulatedBackend::descriptor("dev-1", DeviceType::SSD, SIM_CAPACITY));
    backend.set_faults(
        "dev-1",
        FaultPlan {
            write_delay: Some(std::time::Duration::from_millis(2)),
            ..Default::default()
        },
    );
    let first = engine_with_journal(
        backend.clone(),
        OperationJournal::open(&journal_path).unwrap(),
    );
    let id = first.begin("dev-1", "DoD-5220.22-M").unwrap();

    // A second engine on the same journal is refused before it can recover
    // the running operation or admit another wipe of the same device
    let err = OperationJournal::open(&journal_path).err().unwrap();
    assert!(format!("{:#}", err).contains("in use"), "{:#}", err);
    assert_eq!(first.status(&id).unwrap().state, OperationState::Running);

    let op = wait_terminal(&first, &id).await;
    assert_eq!(op.state, OperationState::Succeeded);
    assert!(op.failure.is_none());
}
