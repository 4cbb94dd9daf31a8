//! Erase executor: runs sanitization methods against devices.
//!
//! One blocking task per in-flight operation. The device table guarantees at
//! most one non-terminal operation per device; `begin` reserves the device
//! before anything destructive happens, and the reservation is released only
//! after the terminal state has been journaled.
//!
//! ```text
//! begin ─► lookup/resolve/validate ─► reserve device ─► open ─► journal(Pending)
//!       ─► Running ─► spawn_blocking(runner) ─► terminal ─► journal ─► release
//! ```

mod operation;
mod runner;


pub use operation::{EraseOperation, FailureCause, OperationState, Outcome, PassPhase, PassProgress};

use crate::algorithms::MethodRegistry;
use crate::config::ExecutorConfig;
use crate::drives::DeviceInventory;
use crate::journal::OperationJournal;
use crate::{DriveError, DriveResult};
use runner::{OperationSlot, RunContext, RunEnd};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn journal_error(e: anyhow::Error) -> DriveError {
    DriveError::Journal(format!("{:#}", e))
}

struct Shared {
    inventory: Arc<DeviceInventory>,
    registry: Arc<MethodRegistry>,
    journal: Mutex<OperationJournal>,
    config: ExecutorConfig,
    /// device_id -> operation_id of its one non-terminal operation
    active: Mutex<HashMap<String, String>>,
    operations: RwLock<HashMap<String, Arc<OperationSlot>>>,
}

impl Shared {
    fn slot(&self, operation_id: &str) -> DriveResult<Arc<OperationSlot>> {
        self.operations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(operation_id)
            .cloned()
            .ok_or_else(|| DriveError::OperationNotFound(operation_id.to_string()))
    }

    fn release(&self, device_id: &str, operation_id: &str) {
        let mut active = lock(&self.active);
        if active.get(device_id).map(String::as_str) == Some(operation_id) {
            active.remove(device_id);
        }
    }

    fn journal(&self, operation: &EraseOperation) -> DriveResult<()> {
        lock(&self.journal).record(operation).map_err(journal_error)
    }

    /// Journal the terminal state, then publish it and free the device in one
    /// step under the device table lock
    fn finish(&self, slot: &OperationSlot, end: RunEnd) {
        let mut operation = slot.snapshot();
        match end {
            RunEnd::Completed => operation.transition(OperationState::Succeeded),
            RunEnd::Aborted => operation.transition(OperationState::Aborted),
            RunEnd::Failed(cause) => operation.fail(cause),
        };

        match (&operation.state, &operation.failure) {
            (OperationState::Failed, Some(cause)) => tracing::error!(
                operation_id = %operation.operation_id,
                device_id = %operation.device_id,
                method = %operation.method_id,
                cause = %cause,
                "erase failed"
            ),
            (state, _) => tracing::info!(
                operation_id = %operation.operation_id,
                device_id = %operation.device_id,
                method = %operation.method_id,
                state = %state,
                passes_completed = operation.passes_completed,
                "erase finished"
            ),
        }

        if let Err(e) = self.journal(&operation) {
            tracing::error!(
                operation_id = %operation.operation_id,
                error = %e,
                "failed to journal terminal state"
            );
        }

        let mut active = lock(&self.active);
        if active.get(&operation.device_id) == Some(&operation.operation_id) {
            active.remove(&operation.device_id);
        }
        slot.update(|op| *op = operation);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "operation task panicked".to_string())
}

pub struct EraseExecutor {
    shared: Arc<Shared>,
    runtime: Handle,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl EraseExecutor {
    /// Must be called from within a tokio runtime; operation tasks run on it.
    ///
    /// Operations a previous process left non-terminal are recorded as
    /// `Failed` with cause `Interrupted` and become visible through `status`.
    pub fn new(
        inventory: Arc<DeviceInventory>,
        registry: Arc<MethodRegistry>,
        mut journal: OperationJournal,
        config: ExecutorConfig,
    ) -> DriveResult<Self> {
        config.validate()?;

        let runtime = Handle::try_current().map_err(|e| {
            DriveError::Config(format!("erase executor needs a tokio runtime: {}", e))
        })?;

        let recovered = journal.recover_interrupted().map_err(journal_error)?;
        if !recovered.is_empty() {
            tracing::warn!(
                count = recovered.len(),
                "recovered interrupted operations from journal"
            );
        }

        let operations = journal
            .load_all()
            .map_err(journal_error)?
            .into_iter()
            .map(|op| (op.operation_id.clone(), Arc::new(OperationSlot::new(op))))
            .collect();

        Ok(Self {
            shared: Arc::new(Shared {
                inventory,
                registry,
                journal: Mutex::new(journal),
                config,
                active: Mutex::new(HashMap::new()),
                operations: RwLock::new(operations),
            }),
            runtime,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Start erasing `device_id` with `method_id` and return the operation id.
    ///
    /// All precondition failures are returned here; nothing has been written
    /// when this returns an error.
    pub fn begin(&self, device_id: &str, method_id: &str) -> DriveResult<String> {
        let shared = &self.shared;

        let device = shared.inventory.lookup(device_id)?;
        let method = shared.registry.resolve(method_id)?.clone();
        shared.registry.validate(&method, &device)?;

        let operation = EraseOperation::new(
            &device.device_id,
            &method.id,
            method.pass_count(),
            device.capacity_bytes,
        );
        let operation_id = operation.operation_id.clone();

        {
            let mut active = lock(&shared.active);
            if let Some(existing) = active.get(device_id) {
                return Err(DriveError::DeviceBusy {
                    device_id: device_id.to_string(),
                    operation_id: existing.clone(),
                });
            }
            active.insert(device_id.to_string(), operation_id.clone());
        }

        // The device is reserved from here on; every early return must release it
        let mut handle = match shared.inventory.open(&device) {
            Ok(handle) => handle,
            Err(e) => {
                shared.release(device_id, &operation_id);
                return Err(e);
            }
        };

        if let Err(e) = shared.journal(&operation) {
            shared.release(device_id, &operation_id);
            return Err(e);
        }

        let slot = Arc::new(OperationSlot::new(operation));
        shared
            .operations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(operation_id.clone(), Arc::clone(&slot));

        let running = slot.update(|op| {
            op.transition(OperationState::Running);
            op.clone()
        });
        if let Err(e) = shared.journal(&running) {
            tracing::warn!(operation_id = %operation_id, error = %e, "failed to journal start");
        }

        tracing::info!(
            operation_id = %operation_id,
            device_id = %device_id,
            method = %method.id,
            passes = method.pass_count(),
            capacity_bytes = device.capacity_bytes,
            "erase started"
        );

        let task_shared = Arc::clone(shared);
        let task = self.runtime.spawn_blocking(move || {
            let ctx = RunContext {
                slot: &slot,
                journal: &task_shared.journal,
                config: &task_shared.config,
            };
            let end = std::panic::catch_unwind(AssertUnwindSafe(|| {
                runner::run(&mut *handle, &method, &ctx)
            }))
            .unwrap_or_else(|payload| {
                RunEnd::Failed(FailureCause::Internal {
                    message: panic_message(payload.as_ref()),
                })
            });
            drop(handle);
            task_shared.finish(&slot, end);
        });

        let mut tasks = lock(&self.tasks);
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(operation_id.clone(), task);

        Ok(operation_id)
    }

    /// Snapshot of the operation. Never waits on device I/O.
    pub fn status(&self, operation_id: &str) -> DriveResult<EraseOperation> {
        Ok(self.shared.slot(operation_id)?.snapshot())
    }

    /// Request cancellation. The chunk in flight completes first.
    /// Aborting a terminal operation is a no-op.
    pub fn abort(&self, operation_id: &str) -> DriveResult<()> {
        let slot = self.shared.slot(operation_id)?;
        if slot.snapshot().is_terminal() {
            return Ok(());
        }
        slot.request_cancel();
        tracing::info!(operation_id = %operation_id, "abort requested");
        Ok(())
    }

    /// Resolve once the operation reaches a terminal state
    pub async fn wait(&self, operation_id: &str) -> DriveResult<EraseOperation> {
        let interval = self.shared.config.status_poll_interval();
        loop {
            let operation = self.status(operation_id)?;
            if operation.is_terminal() {
                return Ok(operation);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Every known operation, oldest first
    pub fn operations(&self) -> Vec<EraseOperation> {
        let mut operations: Vec<EraseOperation> = self
            .shared
            .operations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|slot| slot.snapshot())
            .collect();
        operations.sort_by(|a, b| a.operation_id.cmp(&b.operation_id));
        operations
    }

    /// Request cancellation of every in-flight operation; returns how many
    pub fn abort_all(&self) -> usize {
        let slots: Vec<Arc<OperationSlot>> = self
            .shared
            .operations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut requested = 0;
        for slot in slots {
            if !slot.snapshot().is_terminal() {
                slot.request_cancel();
                requested += 1;
            }
        }
        if requested > 0 {
            tracing::warn!(count = requested, "aborting all in-flight operations");
        }
        requested
    }

    /// Abort everything and wait until every operation task has finished
    pub async fn shutdown(&self) {
        self.abort_all();
        let tasks: Vec<(String, JoinHandle<()>)> = lock(&self.tasks).drain().collect();

        let results = futures::future::join_all(tasks.into_iter().map(|(id, task)| async move {
            (id, task.await)
        }))
        .await;

        for (operation_id, result) in results {
            if let Err(e) = result {
                tracing::error!(
                    operation_id = %operation_id,
                    error = %e,
                    "operation task did not complete cleanly"
                );
            }
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }
}
