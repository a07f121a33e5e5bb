/*!
 * Naming Types
 * Errors, options, and data carried by naming requests
 */

use super::traits::ServiceHandle;
use crate::core::types::Pid;
use bitflags::bitflags;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Naming operation result
pub type NamingResult<T> = Result<T, NamingError>;

/// Naming errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum NamingError {
    #[error("No such path: {0}")]
    #[diagnostic(
        code(naming::not_found),
        help("Nothing is bound at or above this path and the backing store has no entry for it.")
    )]
    NotFound(String),

    #[error("Invalid path: {0}")]
    #[diagnostic(code(naming::invalid_path), help("Paths must be absolute and '/'-separated."))]
    InvalidPath(String),

    #[error("Nothing is bound at {0}")]
    #[diagnostic(code(naming::unknown_path))]
    UnknownPath(String),

    #[error("Invalid executable: {0}")]
    #[diagnostic(
        code(naming::invalid_executable),
        help("The translator command could not be started by the execution service.")
    )]
    InvalidExecutable(String),

    #[error("Translator at {path} failed to start: {reason}")]
    #[diagnostic(
        code(naming::translator_failed),
        help("The mount was reset; a later lookup will try to start it again.")
    )]
    TranslatorFailed { path: String, reason: String },

    #[error("Illegal operation: {0}")]
    #[diagnostic(code(naming::illegal_operation))]
    IllegalOperation(String),

    #[error("Service unreachable: {0}")]
    #[diagnostic(code(naming::service_unreachable))]
    ServiceUnreachable(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(naming::io_error))]
    Io(String),
}

impl From<std::io::Error> for NamingError {
    fn from(err: std::io::Error) -> Self {
        NamingError::Io(err.to_string())
    }
}

bitflags! {
    /// How a translator binding is applied
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TranslatorOptions: u32 {
        /// Start (or stop) the translator process now
        const ACTIVATE = 0b0001;
        /// Persist (or remove) the mount table entry
        const PASSIVE = 0b0010;
        /// Replace a running translator
        const FORCE = 0b0100;
    }
}

/// Outcome of a lookup: the object that serves the path and the part of
/// the path that object still has to resolve
#[derive(Debug, Clone)]
pub struct Resolution {
    pub handle: ServiceHandle,
    pub remainder: String,
}

/// Lifecycle position of a translator mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "pid")]
pub enum MountStatus {
    Configured,
    Starting(Option<Pid>),
    Active(Pid),
}

/// Introspection snapshot of one translator mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountInfo {
    pub path: String,
    pub command: String,
    pub args: Vec<String>,
    pub passive: bool,
    pub status: MountStatus,
}

/// Kind of namespace entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    File,
    Directory,
}

/// Entry attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    pub kind: FileKind,
    pub size: u64,
    pub readonly: bool,
}

/// Directory listing entry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Requested access for an open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn writes(&self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

/// Open-file diagnostic record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFileInfo {
    pub pid: Pid,
    pub descriptor: u64,
    pub path: String,
    pub mode: AccessMode,
    /// Name of the object serving the file
    pub server: String,
}

impl fmt::Display for OpenFileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {} ({:?}) via {}", self.pid, self.descriptor, self.path, self.mode, self.server)
    }
}
