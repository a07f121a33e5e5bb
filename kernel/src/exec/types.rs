/*!
 * Execution Types
 * Spawn requests, launch data, and execution errors
 */

use crate::core::types::{ParentId, Pid};
use crate::naming::ServiceHandle;
use crate::process::ProcessError;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Execution result
pub type ExecResult<T> = Result<T, ExecError>;

/// Execution errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ExecError {
    #[error("Invalid executable: {0}")]
    #[diagnostic(
        code(exec::invalid_executable),
        help("Commands must be non-empty and free of shell metacharacters and '..'.")
    )]
    InvalidExecutable(String),

    #[error("Spawn failed: {0}")]
    #[diagnostic(code(exec::spawn_failed))]
    SpawnFailed(String),

    #[error("No launch data for process {0}")]
    #[diagnostic(
        code(exec::unknown_process),
        help("Launch data can be fetched once, by the process it was created for.")
    )]
    UnknownProcess(Pid),

    #[error("Execution service unreachable: {0}")]
    #[diagnostic(code(exec::service_unreachable))]
    ServiceUnreachable(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Process(#[from] ProcessError),
}

/// Stream handles given to a new process; `None` means no stream
#[derive(Debug, Clone, Default)]
pub struct StdHandles {
    pub stdin: Option<ServiceHandle>,
    pub stdout: Option<ServiceHandle>,
    pub stderr: Option<ServiceHandle>,
}

/// Extra launch data for a translator
#[derive(Debug, Clone)]
pub struct TranslatorLaunch {
    /// Where the translator is mounted
    pub mount_path: String,
    /// Object serving the node beneath the mount
    pub backing: ServiceHandle,
    /// Path of that node within `backing`
    pub backing_path: String,
}

/// Request to start a process
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub cmd: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub std: StdHandles,
    pub parent: ParentId,
    pub translator: Option<TranslatorLaunch>,
}

impl SpawnRequest {
    pub fn new(cmd: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args,
            env: BTreeMap::new(),
            std: StdHandles::default(),
            parent: ParentId::Daemon,
            translator: None,
        }
    }

    pub fn with_parent(mut self, parent: ParentId) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_std(mut self, std: StdHandles) -> Self {
        self.std = std;
        self
    }

    /// Mark the request as a translator start; the process is parented to the translator root
    pub fn with_translator(mut self, launch: TranslatorLaunch) -> Self {
        self.parent = ParentId::Translator;
        self.translator = Some(launch);
        self
    }
}

/// Everything a new process needs to bootstrap, fetched once
#[derive(Debug, Clone)]
pub struct LaunchData {
    pub cmd: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub std: StdHandles,
    pub translator: Option<TranslatorLaunch>,
}

impl From<SpawnRequest> for LaunchData {
    fn from(request: SpawnRequest) -> Self {
        Self {
            cmd: request.cmd,
            args: request.args,
            env: request.env,
            std: request.std,
            translator: request.translator,
        }
    }
}

/// Reject commands that could escape the executable contract
pub fn validate_command(command: &str) -> ExecResult<()> {
    if command.trim().is_empty() {
        return Err(ExecError::InvalidExecutable("empty command".to_string()));
    }

    let dangerous_chars = [';', '|', '&', '\n', '\r', '\0', '`', '$', '(', ')'];
    if command.chars().any(|c| dangerous_chars.contains(&c)) {
        return Err(ExecError::InvalidExecutable(format!(
            "{}: contains shell metacharacters",
            command
        )));
    }

    if command.contains("..") {
        return Err(ExecError::InvalidExecutable(format!(
            "{}: contains path traversal",
            command
        )));
    }

    Ok(())
}
