/*!
 * Process Types
 * Common types for process management
 */

use crate::core::serde::{is_empty_vec, is_false, is_none, is_zero_usize, system_time_micros};
use crate::core::types::{ExitStatus, ParentId, Pid, ProcessGroupId, SessionId, TerminalId};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

/// Process operation result
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Process errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ProcessError {
    #[error("Process {0} not found")]
    #[diagnostic(
        code(process::unknown_process),
        help("The process may have exited or never existed. Check PID validity.")
    )]
    UnknownProcess(Pid),

    #[error("Process group {0} has no members")]
    #[diagnostic(code(process::unknown_process_group))]
    UnknownProcessGroup(ProcessGroupId),

    #[error("Illegal operation: {0}")]
    #[diagnostic(
        code(process::illegal_operation),
        help("The operation is not permitted in the process's current state.")
    )]
    IllegalOperation(String),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    #[diagnostic(code(process::invalid_state_transition))]
    InvalidStateTransition {
        from: ProcessState,
        to: ProcessState,
    },

    #[error("Process {0} has no children to wait for")]
    #[diagnostic(code(process::no_children))]
    NoChildren(Pid),

    #[error("Process {0} has already exited")]
    #[diagnostic(code(process::exited))]
    Exited(Pid),

    #[error("Wait cancelled: process {0} is being torn down")]
    #[diagnostic(code(process::cancelled))]
    Cancelled(Pid),

    #[error("Timed out waiting on process {0}")]
    #[diagnostic(code(process::timed_out))]
    TimedOut(Pid),

    #[error("Kernel is shutting down")]
    #[diagnostic(
        code(process::kernel_shutting_down),
        help("No new processes are accepted once shutdown has begun.")
    )]
    KernelShuttingDown,
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Registered, runtime still bootstrapping
    Starting,
    /// Process is running
    Running,
    /// Job-control stop
    Suspended,
    /// Asked to terminate, cleaning up
    Stopping,
    /// Finished
    Shutdown,
}

impl ProcessState {
    /// Check whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        self == next
            || matches!(
                (self, next),
                (Starting, Running)
                    | (Running, Stopping)
                    | (Running, Suspended)
                    | (Suspended, Running)
                    | (Suspended, Stopping)
                    | (Stopping, Shutdown)
            )
    }
}

/// Whole-kernel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelState {
    Running,
    Stopping,
    Shutdown,
}

/// Termination notice delivered to exactly one waiter or kept in the zombie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildEvent {
    pub pid: Pid,
    pub process_group_id: ProcessGroupId,
    pub state: ProcessState,
    pub exit_status: ExitStatus,
}

/// Lifecycle event names a handler can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcEventKind {
    Child,
    Deregister,
    Resume,
}

/// Lifecycle event passed to handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcEvent {
    /// A child of the subscribed process exited and became a zombie
    Child(ChildEvent),
    Deregister { pid: Pid },
    Resume { pid: Pid },
}

impl ProcEvent {
    pub fn kind(&self) -> ProcEventKind {
        match self {
            ProcEvent::Child(_) => ProcEventKind::Child,
            ProcEvent::Deregister { .. } => ProcEventKind::Deregister,
            ProcEvent::Resume { .. } => ProcEventKind::Resume,
        }
    }
}

/// Event handler callback
pub type EventHandler = Arc<dyn Fn(&ProcEvent) + Send + Sync>;

/// Point-in-time snapshot of a process record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProcessData {
    pub pid: Pid,
    pub parent_id: ParentId,
    pub process_group_id: ProcessGroupId,
    pub session_id: SessionId,
    #[serde(skip_serializing_if = "is_none", default)]
    pub terminal_id: Option<TerminalId>,
    pub cmd: String,
    #[serde(skip_serializing_if = "is_empty_vec", default)]
    pub args: Vec<String>,
    #[serde(with = "system_time_micros")]
    pub start_time: SystemTime,
    pub state: ProcessState,
    #[serde(skip_serializing_if = "is_false", default)]
    pub is_zombie: bool,
    #[serde(skip_serializing_if = "is_empty_vec", default)]
    pub children: Vec<Pid>,
    #[serde(skip_serializing_if = "is_zero_usize", default)]
    pub pending_signals: usize,
}

/// Outcome of a kernel shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Pids in the order TERMINATE was sent
    pub terminated: Vec<Pid>,
    /// Pids removed by the kernel after the grace period expired
    pub forced: Vec<Pid>,
}
