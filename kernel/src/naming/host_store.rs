/*!
 * Host Store
 * Backing file store over one host directory tree
 */

use super::traits::{FileNamespace, RemoteObject};
use super::types::{AccessMode, DirEntry, FileAttributes, FileKind, NamingError, NamingResult, OpenFileInfo};
use crate::core::types::Pid;
use ahash::RandomState;
use dashmap::DashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

struct OpenEntry {
    path: String,
    mode: AccessMode,
    _file: File,
}

/// File namespace rooted at a host directory.
///
/// `..` can never climb above the root.
pub struct HostStore {
    name: String,
    root: PathBuf,
    open: DashMap<(Pid, u64), OpenEntry, RandomState>,
    next_descriptor: AtomicU64,
}

impl std::fmt::Debug for HostStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostStore")
            .field("root", &self.root)
            .field("open", &self.open.len())
            .finish()
    }
}

impl HostStore {
    /// Open the store, creating the root directory if needed
    pub fn new<P: Into<PathBuf>>(root: P) -> NamingResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| map_io(e, &root.to_string_lossy()))?;
        info!(root = %root.display(), "Host store ready");
        Ok(Self {
            name: format!("host-store:{}", root.display()),
            root,
            open: DashMap::with_hasher(RandomState::new()),
            next_descriptor: AtomicU64::new(3),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a namespace path to a host path inside the root
    fn resolve(&self, path: &str) -> PathBuf {
        let mut components = Vec::with_capacity(8);
        for component in Path::new(path).components() {
            match component {
                Component::Normal(name) => components.push(name),
                Component::ParentDir => {
                    components.pop();
                }
                _ => {}
            }
        }

        let mut resolved = self.root.clone();
        resolved.extend(components);
        resolved
    }
}

fn map_io(err: io::Error, path: &str) -> NamingError {
    match err.kind() {
        io::ErrorKind::NotFound => NamingError::NotFound(path.to_string()),
        _ => NamingError::Io(format!("{}: {}", path, err)),
    }
}

impl RemoteObject for HostStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_namespace(&self) -> Option<&dyn FileNamespace> {
        Some(self)
    }
}

impl FileNamespace for HostStore {
    fn attributes(&self, path: &str) -> NamingResult<FileAttributes> {
        let metadata = fs::metadata(self.resolve(path)).map_err(|e| map_io(e, path))?;
        Ok(FileAttributes {
            kind: if metadata.is_dir() {
                FileKind::Directory
            } else {
                FileKind::File
            },
            size: metadata.len(),
            readonly: metadata.permissions().readonly(),
        })
    }

    fn list(&self, path: &str) -> NamingResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path)).map_err(|e| map_io(e, path))? {
            let entry = entry.map_err(|e| map_io(e, path))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type().map(|t| t.is_dir()).unwrap_or(false),
            });
        }
        entries.sort();
        Ok(entries)
    }

    fn create(&self, path: &str, kind: FileKind) -> NamingResult<()> {
        let target = self.resolve(path);
        let result = match kind {
            FileKind::Directory => fs::create_dir(&target),
            FileKind::File => OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .map(|_| ()),
        };
        result.map_err(|e| map_io(e, path))
    }

    fn delete(&self, path: &str) -> NamingResult<()> {
        let target = self.resolve(path);
        if target == self.root {
            return Err(NamingError::IllegalOperation("cannot delete the store root".to_string()));
        }
        let metadata = fs::metadata(&target).map_err(|e| map_io(e, path))?;
        let result = if metadata.is_dir() {
            fs::remove_dir(&target)
        } else {
            fs::remove_file(&target)
        };
        result.map_err(|e| map_io(e, path))
    }

    fn rename(&self, from: &str, to: &str) -> NamingResult<()> {
        fs::rename(self.resolve(from), self.resolve(to)).map_err(|e| map_io(e, from))
    }

    fn open(&self, pid: Pid, path: &str, mode: AccessMode) -> NamingResult<u64> {
        let file = OpenOptions::new()
            .read(!mode.writes() || mode == AccessMode::ReadWrite)
            .write(mode.writes())
            .create(mode.writes())
            .open(self.resolve(path))
            .map_err(|e| map_io(e, path))?;

        let descriptor = self.next_descriptor.fetch_add(1, Ordering::SeqCst);
        self.open.insert(
            (pid, descriptor),
            OpenEntry {
                path: path.to_string(),
                mode,
                _file: file,
            },
        );
        debug!(pid, descriptor, path, ?mode, "Opened file");
        Ok(descriptor)
    }

    fn close(&self, pid: Pid, descriptor: u64) -> NamingResult<()> {
        self.open
            .remove(&(pid, descriptor))
            .map(|_| ())
            .ok_or_else(|| {
                NamingError::IllegalOperation(format!(
                    "descriptor {} is not open for process {}",
                    descriptor, pid
                ))
            })
    }

    fn open_files(&self, pid: Pid) -> Vec<OpenFileInfo> {
        let mut files: Vec<OpenFileInfo> = self
            .open
            .iter()
            .filter(|entry| entry.key().0 == pid)
            .map(|entry| OpenFileInfo {
                pid,
                descriptor: entry.key().1,
                path: entry.value().path.clone(),
                mode: entry.value().mode,
                server: self.name.clone(),
            })
            .collect();
        files.sort_by_key(|f| f.descriptor);
        files
    }
}
