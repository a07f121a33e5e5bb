/*!
 * Naming Module
 * Hierarchical namespace, translator mounts, and the backing store adapter
 */

mod activation;
pub mod host_store;
mod mount;
pub mod paths;
pub mod service;
pub mod table;
pub mod traits;
pub mod types;

// Re-export for convenience
pub use host_store::HostStore;
pub use service::{NamingService, NamingServiceBuilder};
pub use table::{MountSpec, MountTable};
pub use traits::{FileNamespace, RemoteObject, ServiceHandle};
pub use types::{
    AccessMode, DirEntry, FileAttributes, FileKind, MountInfo, MountStatus, NamingError,
    NamingResult, OpenFileInfo, Resolution, TranslatorOptions,
};
