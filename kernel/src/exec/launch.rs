/*!
 * Launch Registry
 * One-shot launch data handed to freshly spawned processes
 */

use super::types::{ExecError, ExecResult, LaunchData};
use crate::core::types::Pid;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct LaunchRegistry {
    pending: Arc<DashMap<Pid, LaunchData, RandomState>>,
}

impl LaunchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pid: Pid, data: LaunchData) {
        self.pending.insert(pid, data);
    }

    /// Remove and return the launch data; a second fetch fails
    pub fn take(&self, pid: Pid) -> ExecResult<LaunchData> {
        self.pending
            .remove(&pid)
            .map(|(_, data)| data)
            .ok_or(ExecError::UnknownProcess(pid))
    }

    /// Drop data that will never be fetched
    pub fn discard(&self, pid: Pid) -> bool {
        self.pending.remove(&pid).is_some()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
