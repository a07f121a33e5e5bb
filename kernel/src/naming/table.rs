/*!
 * Mount Table
 * Persisted passive translator declarations
 *
 * One line per mount: `mountPath=command arg1 arg2 ...`. Arguments are
 * space-joined with no escaping, so an argument containing whitespace
 * does not survive a save/load cycle.
 */

use super::types::{NamingError, NamingResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Command line of a persisted translator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub command: String,
    pub args: Vec<String>,
}

impl MountSpec {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    fn parse(value: &str) -> Option<Self> {
        let mut words = value.split_whitespace();
        let command = words.next()?.to_string();
        Some(Self {
            command,
            args: words.map(str::to_owned).collect(),
        })
    }

    fn render(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountTable {
    entries: BTreeMap<String, MountSpec>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the table; a missing file is an empty table
    pub fn load(path: &Path) -> NamingResult<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No mount table, starting empty");
                Ok(Self::new())
            }
            Err(e) => Err(NamingError::Io(format!("{}: {}", path.display(), e))),
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parsed = line
                .split_once('=')
                .and_then(|(key, value)| Some((key.trim(), MountSpec::parse(value)?)));
            match parsed {
                Some((key, spec)) if key.starts_with('/') => {
                    entries.insert(key.to_string(), spec);
                }
                _ => warn!(line = lineno + 1, "Skipping malformed mount table entry"),
            }
        }
        Self { entries }
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(path, spec)| format!("{}={}\n", path, spec.render()))
            .collect()
    }

    /// Rewrite the whole file; readers never see a partial table
    pub fn save(&self, path: &Path) -> NamingResult<()> {
        let io_err = |e: std::io::Error| NamingError::Io(format!("{}: {}", path.display(), e));
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let staging = path.with_extension("tmp");
        fs::write(&staging, self.render()).map_err(io_err)?;
        fs::rename(&staging, path).map_err(io_err)?;
        debug!(path = %path.display(), entries = self.entries.len(), "Mount table saved");
        Ok(())
    }

    pub fn insert(&mut self, mount_path: String, spec: MountSpec) -> Option<MountSpec> {
        self.entries.insert(mount_path, spec)
    }

    pub fn remove(&mut self, mount_path: &str) -> Option<MountSpec> {
        self.entries.remove(mount_path)
    }

    pub fn get(&self, mount_path: &str) -> Option<&MountSpec> {
        self.entries.get(mount_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MountSpec)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
