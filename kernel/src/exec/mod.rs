/*!
 * Process Execution
 * Starting processes on behalf of the kernel
 */

mod host;
mod launch;
mod types;

pub use host::{HostExecution, MOUNT_PATH_ENV, PID_ENV};
pub use launch::LaunchRegistry;
pub use types::{
    validate_command, ExecError, ExecResult, LaunchData, SpawnRequest, StdHandles,
    TranslatorLaunch,
};

use crate::core::types::Pid;

/// Process execution service.
///
/// `spawn` registers the new process with the process manager before it
/// returns the pid.
pub trait ProcessExecution: Send + Sync {
    fn spawn(&self, request: SpawnRequest) -> ExecResult<Pid>;

    /// One-shot query made by the new process during bootstrap
    fn fetch_launch_data(&self, pid: Pid) -> ExecResult<LaunchData>;
}
