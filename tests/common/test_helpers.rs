#![allow(dead_code)]

//! Common test helper functions
use sayonara_engine::config::{ExecutorConfig, VerificationLevel};
use sayonara_engine::drives::{DeviceBackend, SimulatedBackend};
use sayonara_engine::journal::OperationJournal;
use sayonara_engine::{DeviceInventory, DeviceType, EraseExecutor, EraseOperation, MethodRegistry};
use std::fs;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

pub const SIM_CAPACITY: u64 = 64 * 1024;

/// Small chunks and millisecond backoff so faults show up quickly
pub fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        chunk_size: 4096,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 4,
        verification: VerificationLevel::Full,
        status_poll_ms: 5,
        ..Default::default()
    }
}

/// Executor over `backend` with an in-memory journal; the inventory is scanned
pub fn engine(backend: Arc<dyn DeviceBackend>) -> EraseExecutor {
    engine_with_journal(backend, OperationJournal::in_memory().unwrap())
}

pub fn engine_with_journal(
    backend: Arc<dyn DeviceBackend>,
    journal: OperationJournal,
) -> EraseExecutor {
    let inventory = Arc::new(DeviceInventory::new(backend));
    inventory.scan().unwrap();
    EraseExecutor::new(
        inventory,
        Arc::new(MethodRegistry::builtin()),
        journal,
        fast_config(),
    )
    .unwrap()
}

/// Simulated SSDs of `SIM_CAPACITY` bytes with the given ids
pub fn simulated(ids: &[&str]) -> (Arc<SimulatedBackend>, EraseExecutor) {
    let backend = Arc::new(SimulatedBackend::new());
    for id in ids {
        backend.add_device(SimulatedBackend::descriptor(id, DeviceType::SSD, SIM_CAPACITY));
    }
    let executor = engine(backend.clone());
    (backend, executor)
}

pub async fn wait_terminal(executor: &EraseExecutor, operation_id: &str) -> EraseOperation {
    tokio::time::timeout(Duration::from_secs(60), executor.wait(operation_id))
        .await
        .expect("operation did not reach a terminal state in time")
        .unwrap()
}

/// Verify that a file contains only zeros
pub fn verify_all_zeros(path: &std::path::Path) -> std::io::Result<bool> {
    let mut file = fs::File::open(path)?;
    let mut buffer = vec![0u8; 4096];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        if buffer[..bytes_read].iter().any(|&b| b != 0) {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Fraction of bytes in the file equal to `byte`
pub fn byte_fraction(path: &std::path::Path, byte: u8) -> std::io::Result<f64> {
    let data = fs::read(path)?;
    if data.is_empty() {
        return Ok(0.0);
    }
    Ok(data.iter().filter(|&&b| b == byte).count() as f64 / data.len() as f64)
}
