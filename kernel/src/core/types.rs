/*!
 * Core Types
 * Common types used across the kernel
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process ID type
pub type Pid = u32;

/// Process group ID type
pub type ProcessGroupId = u32;

/// Session ID type (0 means "no session")
pub type SessionId = u32;

/// Terminal device ID type
pub type TerminalId = u32;

/// Exit status reported when a process deregisters
pub type ExitStatus = i32;

/// Caller pid reserved for kernel-internal callers
pub const KERNEL_PID: Pid = 0;

/// Exit status recorded when the kernel removes a process that never reported one
pub const FORCED_EXIT_STATUS: ExitStatus = -1;

/// Common result type for kernel operations
pub type KernelResult<T> = Result<T, super::errors::KernelError>;

/// Who a process reports to when it exits.
///
/// On the wire this is the raw `parentId` integer: `0` for root-level
/// daemons and session leaders, `-1` for translators, a positive pid
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum ParentId {
    /// Root-level daemon or group leader, never waited on
    Daemon,
    /// Translator bound into the namespace, never waited on
    Translator,
    /// Ordinary child of another process
    Process(Pid),
}

impl ParentId {
    /// Decode the raw wire value
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(ParentId::Daemon),
            -1 => Some(ParentId::Translator),
            n if n > 0 => Pid::try_from(n).ok().map(ParentId::Process),
            _ => None,
        }
    }

    /// Encode as the raw wire value
    pub fn as_raw(&self) -> i64 {
        match self {
            ParentId::Daemon => 0,
            ParentId::Translator => -1,
            ParentId::Process(pid) => i64::from(*pid),
        }
    }

    /// Parent pid, if this process has a real parent
    pub fn pid(&self) -> Option<Pid> {
        match self {
            ParentId::Process(pid) => Some(*pid),
            _ => None,
        }
    }

    /// Root-level processes are removed outright on exit
    pub fn is_root_level(&self) -> bool {
        !matches!(self, ParentId::Process(_))
    }
}

impl From<ParentId> for i64 {
    fn from(parent: ParentId) -> Self {
        parent.as_raw()
    }
}

impl TryFrom<i64> for ParentId {
    type Error = String;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        ParentId::from_raw(raw).ok_or_else(|| format!("invalid parent id: {}", raw))
    }
}

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}
