// Pass runner: streams each pass of a method across a device on a blocking
// thread. Never returns an error; every way a run can end is a `RunEnd`.

use super::operation::{EraseOperation, FailureCause, PassPhase, PassProgress};
use crate::algorithms::{PatternFiller, SanitizationMethod};
use crate::config::{ExecutorConfig, VerificationLevel};
use crate::error::{ErrorClass, ErrorContext, ExponentialBackoff, NoRetry, RetryStrategy};
use crate::io::{BlockDevice, DeviceIoError, DeviceIoResult};
use crate::journal::OperationJournal;
use rand::Rng;
use ring::rand::SystemRandom;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Instant;

/// Shared record of one operation: the snapshot `status` reads and the
/// cancellation flag `abort` sets
pub(crate) struct OperationSlot {
    record: RwLock<EraseOperation>,
    cancel: AtomicBool,
}

impl OperationSlot {
    pub(crate) fn new(operation: EraseOperation) -> Self {
        Self {
            record: RwLock::new(operation),
            cancel: AtomicBool::new(false),
        }
    }

    pub(crate) fn snapshot(&self) -> EraseOperation {
        self.record
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Mutate the record under a short write lock. Never call with I/O inside `f`.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut EraseOperation) -> R) -> R {
        let mut record = self.record.write().unwrap_or_else(|e| e.into_inner());
        f(&mut record)
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// How a run ended, before it is applied to the operation record
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RunEnd {
    Completed,
    Aborted,
    Failed(FailureCause),
}

pub(crate) struct RunContext<'a> {
    pub slot: &'a OperationSlot,
    pub journal: &'a Mutex<OperationJournal>,
    pub config: &'a ExecutorConfig,
}

/// Journal progress every `checkpoint_interval` or `checkpoint_bytes`,
/// whichever comes first
struct Checkpointer {
    last: Instant,
    bytes_since: u64,
}

impl Checkpointer {
    fn new() -> Self {
        Self {
            last: Instant::now(),
            bytes_since: 0,
        }
    }

    fn note(&mut self, bytes: u64, config: &ExecutorConfig) -> bool {
        self.bytes_since += bytes;
        if self.bytes_since >= config.checkpoint_bytes
            || self.last.elapsed() >= config.checkpoint_interval()
        {
            self.last = Instant::now();
            self.bytes_since = 0;
            return true;
        }
        false
    }
}

enum PhaseEnd {
    Done,
    Aborted,
}

pub(crate) fn run(
    device: &mut dyn BlockDevice,
    method: &SanitizationMethod,
    ctx: &RunContext<'_>,
) -> RunEnd {
    let capacity = device.capacity();
    let rng = SystemRandom::new();
    let retry = ctx.config.retry_strategy();
    let mut checkpoint = Checkpointer::new();
    let mut previous: Option<PatternFiller> = None;

    let (operation_id, device_id) = ctx
        .slot
        .update(|op| (op.operation_id.clone(), op.device_id.clone()));

    for (index, pass) in method.passes.iter().enumerate() {
        if ctx.slot.cancel_requested() {
            return RunEnd::Aborted;
        }

        let filler = match PatternFiller::for_pass(&pass.pattern, previous.as_ref(), &rng) {
            Ok(filler) => filler,
            Err(e) => {
                return RunEnd::Failed(FailureCause::Internal {
                    message: e.to_string(),
                })
            }
        };

        ctx.slot
            .update(|op| op.progress = PassProgress::start(index, capacity));

        tracing::info!(
            operation_id = %operation_id,
            device_id = %device_id,
            method = %method.id,
            pass = index + 1,
            passes = method.pass_count(),
            pattern = %pass.pattern.describe(),
            "starting pass"
        );

        if filler.is_hardware() {
            if let Err(e) = with_retry(&NoRetry, || device.hardware_erase()) {
                return RunEnd::Failed(FailureCause::HardwareEraseFailed {
                    pass: index,
                    message: e.to_string(),
                });
            }
            ctx.slot.update(|op| op.progress.bytes_written = capacity);
        } else {
            let pass_ctx = PassContext {
                index,
                capacity,
                filler: &filler,
                retry: &retry,
                error_context: ErrorContext::for_pass(device_id.as_str(), &method.id, index),
            };

            match write_pass(device, &pass_ctx, ctx, &mut checkpoint) {
                Ok(PhaseEnd::Done) => {}
                Ok(PhaseEnd::Aborted) => return RunEnd::Aborted,
                Err(cause) => return RunEnd::Failed(cause),
            }

            if pass.verify {
                match verify_pass(device, &pass_ctx, ctx) {
                    Ok(PhaseEnd::Done) => {}
                    Ok(PhaseEnd::Aborted) => return RunEnd::Aborted,
                    Err(cause) => return RunEnd::Failed(cause),
                }
            }
        }

        ctx.slot.update(|op| op.passes_completed = index + 1);
        record_checkpoint(ctx);
        previous = Some(filler);
    }

    RunEnd::Completed
}

struct PassContext<'a> {
    index: usize,
    capacity: u64,
    filler: &'a PatternFiller,
    retry: &'a ExponentialBackoff,
    error_context: ErrorContext,
}

fn write_pass(
    device: &mut dyn BlockDevice,
    pass: &PassContext<'_>,
    ctx: &RunContext<'_>,
    checkpoint: &mut Checkpointer,
) -> Result<PhaseEnd, FailureCause> {
    let chunk_size = ctx.config.chunk_size as u64;
    let mut buf = vec![0u8; chunk_size.min(pass.capacity) as usize];
    let mut offset = 0u64;

    while offset < pass.capacity {
        // The chunk in flight always completes; cancellation lands between chunks
        if ctx.slot.cancel_requested() {
            return Ok(PhaseEnd::Aborted);
        }

        let len = chunk_size.min(pass.capacity - offset) as usize;
        let chunk = &mut buf[..len];
        pass.filler.fill(offset, chunk);

        with_retry_logged(pass, offset, || device.write_at(offset, chunk))
            .map_err(|e| failure_for(pass.index, offset, e))?;

        offset += len as u64;
        ctx.slot.update(|op| op.progress.bytes_written = offset);

        if checkpoint.note(len as u64, ctx.config) {
            record_checkpoint(ctx);
        }
    }

    with_retry_logged(pass, offset, || device.sync())
        .map_err(|e| failure_for(pass.index, offset, e))?;

    Ok(PhaseEnd::Done)
}

/// Chunk indices to read back for a pass of `chunks` chunks
fn verification_plan(chunks: u64, level: VerificationLevel, samples: usize) -> Vec<u64> {
    if chunks == 0 {
        return Vec::new();
    }
    match level {
        VerificationLevel::Full => (0..chunks).collect(),
        VerificationLevel::Sampled => {
            let mut picked = BTreeSet::new();
            picked.insert(0);
            picked.insert(chunks - 1);
            let mut rng = rand::thread_rng();
            for _ in 0..samples {
                picked.insert(rng.gen_range(0..chunks));
            }
            picked.into_iter().collect()
        }
    }
}

fn verify_pass(
    device: &mut dyn BlockDevice,
    pass: &PassContext<'_>,
    ctx: &RunContext<'_>,
) -> Result<PhaseEnd, FailureCause> {
    let chunk_size = ctx.config.chunk_size as u64;
    let chunks = pass.capacity.div_ceil(chunk_size);
    let plan = verification_plan(chunks, ctx.config.verification, ctx.config.verify_samples);
    let mut buf = vec![0u8; chunk_size.min(pass.capacity) as usize];

    ctx.slot.update(|op| op.progress.phase = PassPhase::Verifying);

    let mut verified = 0u64;
    for chunk_index in plan {
        if ctx.slot.cancel_requested() {
            return Ok(PhaseEnd::Aborted);
        }

        let offset = chunk_index * chunk_size;
        let len = chunk_size.min(pass.capacity - offset) as usize;
        let chunk = &mut buf[..len];

        with_retry_logged(pass, offset, || device.read_at(offset, chunk))
            .map_err(|e| failure_for(pass.index, offset, e))?;

        if let Some(position) = pass.filler.first_mismatch(offset, chunk) {
            let at = offset + position as u64;
            tracing::error!(
                context = %pass.error_context.clone().with_offset(at),
                "read-back does not match written pattern"
            );
            return Err(FailureCause::VerificationMismatch {
                pass: pass.index,
                offset: at,
            });
        }

        verified += len as u64;
        ctx.slot.update(|op| op.progress.bytes_verified = verified);
    }

    Ok(PhaseEnd::Done)
}

fn failure_for(pass: usize, offset: u64, error: DeviceIoError) -> FailureCause {
    match error {
        DeviceIoError::Disconnected(message) => FailureCause::Disconnected {
            pass,
            offset,
            message,
        },
        other => FailureCause::Io {
            pass,
            offset,
            message: other.to_string(),
        },
    }
}

/// Run `op`, retrying transient failures per `strategy` on this thread
fn with_retry<S: RetryStrategy + ?Sized>(
    strategy: &S,
    mut op: impl FnMut() -> DeviceIoResult<()>,
) -> DeviceIoResult<()> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(e) if strategy.should_retry(attempt, e.class()) => {
                std::thread::sleep(strategy.next_delay(attempt));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn with_retry_logged(
    pass: &PassContext<'_>,
    offset: u64,
    mut op: impl FnMut() -> DeviceIoResult<()>,
) -> DeviceIoResult<()> {
    let mut attempt = 0u32;
    let result = with_retry(pass.retry, || {
        let result = op();
        if let Err(e) = &result {
            if e.class() == ErrorClass::Transient {
                attempt += 1;
                tracing::warn!(
                    context = %pass.error_context.clone().with_offset(offset),
                    attempt,
                    error = %e,
                    "transient I/O error"
                );
            }
        }
        result
    });

    if let Err(e) = &result {
        tracing::error!(
            context = %pass.error_context.clone().with_offset(offset),
            class = %e.class(),
            error = %e,
            "chunk I/O failed"
        );
    }
    result
}

fn record_checkpoint(ctx: &RunContext<'_>) {
    let snapshot = ctx.slot.snapshot();
    let mut journal = ctx.journal.lock().unwrap_or_else(|e| e.into_inner());
    if let Err(e) = journal.record(&snapshot) {
        tracing::warn!(
            operation_id = %snapshot.operation_id,
            error = %format!("{:#}", e),
            "failed to journal progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sampled_plan_includes_ends() {
        let plan = verification_plan(100, VerificationLevel::Sampled, 5);
        assert_eq!(plan.first(), Some(&0));
        assert_eq!(plan.last(), Some(&99));
        assert!(plan.len() <= 7);
        assert!(plan.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_full_plan_covers_every_chunk() {
        assert_eq!(verification_plan(4, VerificationLevel::Full, 0), vec![0, 1, 2, 3]);
        assert!(verification_plan(0, VerificationLevel::Full, 0).is_empty());
        assert_eq!(verification_plan(1, VerificationLevel::Sampled, 10), vec![0]);
    }

    #[test]
    fn test_with_retry_recovers_from_transient() {
        let strategy =
            ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(2), 3);
        let mut failures = 2;
        let result = with_retry(&strategy, || {
            if failures > 0 {
                failures -= 1;
                Err(DeviceIoError::Transient("busy".to_string()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_ok());
    }

    #[test]
    fn test_with_retry_gives_up() {
        let strategy =
            ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(2), 2);
        let mut calls = 0;
        let result = with_retry(&strategy, || {
            calls += 1;
            Err(DeviceIoError::Transient("busy".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_with_retry_never_retries_disconnect() {
        let strategy =
            ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(2), 5);
        let mut calls = 0;
        let result = with_retry(&strategy, || {
            calls += 1;
            Err(DeviceIoError::Disconnected("gone".to_string()))
        });
        assert!(matches!(result, Err(DeviceIoError::Disconnected(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failure_for_maps_disconnect() {
        let cause = failure_for(1, 512, DeviceIoError::Disconnected("gone".to_string()));
        assert!(matches!(cause, FailureCause::Disconnected { pass: 1, offset: 512, .. }));

        let cause = failure_for(0, 0, DeviceIoError::Fatal("EROFS".to_string()));
        assert!(matches!(cause, FailureCause::Io { .. }));
    }

    #[test]
    fn test_checkpointer_bytes_threshold() {
        let config = ExecutorConfig {
            checkpoint_bytes: 100,
            checkpoint_interval_secs: 3600,
            ..Default::default()
        };
        let mut checkpoint = Checkpointer::new();
        assert!(!checkpoint.note(60, &config));
        assert!(checkpoint.note(60, &config));
        assert!(!checkpoint.note(10, &config));
    }
}
