use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of an erase operation.
///
/// `Pending -> Running -> {Succeeded, Failed, Aborted}`; the last three are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Succeeded | OperationState::Failed | OperationState::Aborted
        )
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            OperationState::Succeeded => Some(Outcome::Succeeded),
            OperationState::Failed => Some(Outcome::Failed),
            OperationState::Aborted => Some(Outcome::Aborted),
            OperationState::Pending | OperationState::Running => None,
        }
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Aborted)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Aborted)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "Pending",
            OperationState::Running => "Running",
            OperationState::Succeeded => "Succeeded",
            OperationState::Failed => "Failed",
            OperationState::Aborted => "Aborted",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result of a terminal operation, as attested in certificates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Succeeded,
    Failed,
    Aborted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "Succeeded",
            Outcome::Failed => "Failed",
            Outcome::Aborted => "Aborted",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an operation ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// I/O error that was not transient, or retries ran out
    Io {
        pass: usize,
        offset: u64,
        message: String,
    },
    Disconnected {
        pass: usize,
        offset: u64,
        message: String,
    },
    /// Read-back did not match what the pass wrote
    VerificationMismatch { pass: usize, offset: u64 },
    HardwareEraseFailed { pass: usize, message: String },
    /// The process stopped while the operation was in flight
    Interrupted,
    Internal { message: String },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Io {
                pass,
                offset,
                message,
            } => write!(f, "I/O error in pass {} at offset {}: {}", pass + 1, offset, message),
            FailureCause::Disconnected {
                pass,
                offset,
                message,
            } => write!(
                f,
                "device disconnected in pass {} at offset {}: {}",
                pass + 1,
                offset,
                message
            ),
            FailureCause::VerificationMismatch { pass, offset } => write!(
                f,
                "verification mismatch in pass {} at offset {}",
                pass + 1,
                offset
            ),
            FailureCause::HardwareEraseFailed { pass, message } => {
                write!(f, "hardware erase failed in pass {}: {}", pass + 1, message)
            }
            FailureCause::Interrupted => write!(f, "interrupted by process exit"),
            FailureCause::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassPhase {
    Writing,
    Verifying,
}

/// Progress within the current pass. Reset at the start of every pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassProgress {
    /// Zero-based index of the current pass
    pub pass_index: usize,
    pub phase: PassPhase,
    pub bytes_written: u64,
    pub bytes_total: u64,
    pub bytes_verified: u64,
}

impl PassProgress {
    pub fn start(pass_index: usize, bytes_total: u64) -> Self {
        Self {
            pass_index,
            phase: PassPhase::Writing,
            bytes_written: 0,
            bytes_total,
            bytes_verified: 0,
        }
    }

    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        (self.bytes_written as f64 / self.bytes_total as f64) * 100.0
    }
}

/// The unit of work and of audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EraseOperation {
    pub operation_id: String,
    pub device_id: String,
    pub method_id: String,
    pub state: OperationState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub progress: PassProgress,
    pub passes_total: usize,
    /// Passes fully written (and verified, where required)
    pub passes_completed: usize,
    pub failure: Option<FailureCause>,
}

impl EraseOperation {
    pub fn new(device_id: &str, method_id: &str, passes_total: usize, capacity: u64) -> Self {
        Self {
            operation_id: Uuid::now_v7().to_string(),
            device_id: device_id.to_string(),
            method_id: method_id.to_string(),
            state: OperationState::Pending,
            started_at: Utc::now(),
            ended_at: None,
            progress: PassProgress::start(0, capacity),
            passes_total,
            passes_completed: 0,
            failure: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.state.outcome()
    }

    /// Move to `next`, stamping the end time for terminal states.
    /// Illegal transitions are ignored and reported as `false`.
    pub fn transition(&mut self, next: OperationState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now().max(self.started_at));
        }
        true
    }

    /// Terminate as `Failed` with the given cause
    pub fn fail(&mut self, cause: FailureCause) -> bool {
        if self.transition(OperationState::Failed) {
            self.failure = Some(cause);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_transitions() {
        use OperationState::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Aborted));
        assert!(!Succeeded.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Succeeded));
        assert!(!Aborted.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Succeeded));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut op = EraseOperation::new("dev-1", "Zero", 1, 4096);
        assert!(op.transition(OperationState::Running));
        assert!(op.transition(OperationState::Aborted));
        assert!(op.ended_at.is_some());

        assert!(!op.transition(OperationState::Running));
        assert!(!op.fail(FailureCause::Interrupted));
        assert_eq!(op.state, OperationState::Aborted);
        assert!(op.failure.is_none());
    }

    #[test]
    fn test_operation_ids_are_time_ordered() {
        let a = EraseOperation::new("dev-1", "Zero", 1, 4096);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = EraseOperation::new("dev-1", "Zero", 1, 4096);
        assert!(a.operation_id < b.operation_id);
    }

    #[test]
    fn test_failure_cause_serde_shape() {
        let cause = FailureCause::Disconnected {
            pass: 0,
            offset: 4096,
            message: "gone".to_string(),
        };
        let json = serde_json::to_value(&cause).unwrap();
        assert_eq!(json["kind"], "disconnected");
        assert_eq!(json["offset"], 4096);

        let back: FailureCause = serde_json::from_value(json).unwrap();
        assert_eq!(back, cause);
    }

    #[test]
    fn test_failure_cause_display_is_one_based() {
        let cause = FailureCause::VerificationMismatch { pass: 2, offset: 0 };
        assert_eq!(cause.to_string(), "verification mismatch in pass 3 at offset 0");
    }

    #[test]
    fn test_progress_percent() {
        let mut progress = PassProgress::start(0, 200);
        progress.bytes_written = 50;
        assert!((progress.percent() - 25.0).abs() < f64::EPSILON);
        assert_eq!(PassProgress::start(0, 0).percent(), 0.0);
    }
}
