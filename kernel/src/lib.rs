/*!
 * Overlay Kernel Library
 * Naming service, process manager, and process execution for a
 * micro-kernel operating-system personality
 */

pub mod core;
pub mod exec;
pub mod monitoring;
pub mod naming;
pub mod process;

// Re-exports
pub use crate::core::{KernelConfig, KernelError, KernelResult};
pub use crate::core::types::{ExitStatus, ParentId, Pid, ProcessGroupId, SessionId, TerminalId};
pub use exec::{ExecError, HostExecution, LaunchData, ProcessExecution, SpawnRequest};
pub use monitoring::init_tracing;
pub use naming::{
    FileNamespace, HostStore, NamingError, NamingService, RemoteObject, Resolution, ServiceHandle,
    TranslatorOptions,
};
pub use process::{
    ChildEvent, KernelState, ProcEvent, ProcEventKind, ProcessData, ProcessError, ProcessManager,
    ProcessState, ShutdownReport, Signal,
};
