/*!
 * Process Module
 * Process registry, signals, lifecycle events, and kernel shutdown
 */

mod events;
pub mod manager;
mod record;
mod shutdown;
pub mod signals;
pub mod types;

// Re-export for convenience
pub use manager::{ProcessManager, ProcessManagerBuilder};
pub use signals::Signal;
pub use types::{
    ChildEvent, EventHandler, KernelState, ProcEvent, ProcEventKind, ProcessData, ProcessError,
    ProcessResult, ProcessState, ShutdownReport,
};
