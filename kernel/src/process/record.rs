/*!
 * Process Record
 * Per-process state guarded by its own lock
 */

use super::signals::SignalQueue;
use super::types::{ChildEvent, EventHandler, ProcEventKind, ProcessData, ProcessState};
use crate::core::sync::WaitContext;
use crate::core::types::{ParentId, Pid, ProcessGroupId, SessionId, TerminalId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::SystemTime;

/// Where a record is in its exit path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Liveness {
    Alive,
    /// Deregistration claimed, handlers firing
    Exiting,
    /// Exited, waiting for the parent to reclaim it
    Zombie(ChildEvent),
    /// Gone from the tree
    Departed,
}

/// Mutable part of a process record.
///
/// Lock order: a parent's record is always locked before a child's.
pub(crate) struct ProcInner {
    pub parent: ParentId,
    pub process_group_id: ProcessGroupId,
    pub session_id: SessionId,
    pub terminal_id: Option<TerminalId>,
    pub state: ProcessState,
    pub liveness: Liveness,
    pub children: Vec<Pid>,
    /// Zombie children in the order they exited
    pub zombies: VecDeque<Pid>,
    /// One-shot channels of callers blocked in wait_for_child
    pub waiters: VecDeque<flume::Sender<ChildEvent>>,
    pub handlers: HashMap<ProcEventKind, Vec<EventHandler>>,
}

impl ProcInner {
    pub fn is_alive(&self) -> bool {
        self.liveness == Liveness::Alive
    }

    pub fn is_zombie(&self) -> bool {
        matches!(self.liveness, Liveness::Zombie(_))
    }

    pub fn forget_child(&mut self, pid: Pid) {
        self.children.retain(|&c| c != pid);
        self.zombies.retain(|&z| z != pid);
    }

    pub fn handlers_for(&self, kind: ProcEventKind) -> Vec<EventHandler> {
        self.handlers.get(&kind).cloned().unwrap_or_default()
    }
}

/// Kernel-side record of one process
pub(crate) struct Proc {
    pub id: Pid,
    pub cmd: String,
    pub args: Vec<String>,
    pub start_time: SystemTime,
    pub inner: Mutex<ProcInner>,
    pub signals: SignalQueue,
    pub wait_ctx: WaitContext,
}

impl Proc {
    pub fn new(
        id: Pid,
        parent: ParentId,
        process_group_id: ProcessGroupId,
        session_id: SessionId,
        cmd: String,
        args: Vec<String>,
    ) -> Self {
        Self {
            id,
            cmd,
            args,
            start_time: SystemTime::now(),
            inner: Mutex::new(ProcInner {
                parent,
                process_group_id,
                session_id,
                terminal_id: None,
                state: ProcessState::Starting,
                liveness: Liveness::Alive,
                children: Vec::new(),
                zombies: VecDeque::new(),
                waiters: VecDeque::new(),
                handlers: HashMap::new(),
            }),
            signals: SignalQueue::new(),
            wait_ctx: WaitContext::new(),
        }
    }

    /// Release every thread blocked on this process's own waits
    pub fn cancel_waits(&self) {
        self.wait_ctx.close();
        self.signals.close();
    }

    pub fn snapshot(&self) -> ProcessData {
        let inner = self.inner.lock();
        ProcessData {
            pid: self.id,
            parent_id: inner.parent,
            process_group_id: inner.process_group_id,
            session_id: inner.session_id,
            terminal_id: inner.terminal_id,
            cmd: self.cmd.clone(),
            args: self.args.clone(),
            start_time: self.start_time,
            state: inner.state,
            is_zombie: inner.is_zombie(),
            children: inner.children.clone(),
            pending_signals: self.signals.len(),
        }
    }
}
