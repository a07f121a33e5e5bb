/*!
 * Naming Traits
 * Capabilities the naming service consumes from bound objects
 *
 * Every bound object is a remote object reference. Some of them (the
 * backing store, most translators) also serve a file namespace; the
 * naming service asks for that capability rather than inspecting types.
 */

use super::types::{AccessMode, DirEntry, FileAttributes, FileKind, NamingError, NamingResult, OpenFileInfo};
use crate::core::types::Pid;
use std::fmt;
use std::sync::Arc;

/// Opaque reference to an object exposed over RPC
pub trait RemoteObject: fmt::Debug + Send + Sync {
    /// Name used in logs and diagnostics
    fn name(&self) -> &str;

    /// File-namespace capability, if this object serves one
    fn as_namespace(&self) -> Option<&dyn FileNamespace> {
        None
    }
}

/// Shared handle to a bound object
pub type ServiceHandle = Arc<dyn RemoteObject>;

/// Minimal file-namespace capability.
///
/// Paths are absolute within the serving object. Mutating operations
/// default to `IllegalOperation` so read-only namespaces implement only
/// the two lookups.
pub trait FileNamespace: Send + Sync {
    /// Attributes of one entry
    fn attributes(&self, path: &str) -> NamingResult<FileAttributes>;

    /// Entries of a directory
    fn list(&self, path: &str) -> NamingResult<Vec<DirEntry>>;

    fn create(&self, path: &str, _kind: FileKind) -> NamingResult<()> {
        Err(unsupported("create", path))
    }

    fn delete(&self, path: &str) -> NamingResult<()> {
        Err(unsupported("delete", path))
    }

    fn rename(&self, from: &str, _to: &str) -> NamingResult<()> {
        Err(unsupported("rename", from))
    }

    /// Open for access on behalf of `pid`; returns a descriptor id
    fn open(&self, _pid: Pid, path: &str, _mode: AccessMode) -> NamingResult<u64> {
        Err(unsupported("open", path))
    }

    fn close(&self, _pid: Pid, _descriptor: u64) -> NamingResult<()> {
        Ok(())
    }

    /// Files `pid` currently holds open in this namespace
    fn open_files(&self, _pid: Pid) -> Vec<OpenFileInfo> {
        Vec::new()
    }
}

fn unsupported(operation: &str, path: &str) -> NamingError {
    NamingError::IllegalOperation(format!("{} not supported for {}", operation, path))
}
