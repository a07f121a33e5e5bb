/*!
 * Process Management
 * Registry of every process: parentage, groups, sessions, zombie
 * bookkeeping, signal queues, and lifecycle events
 */

use super::events::{fire, EventRegistry};
use super::record::{Liveness, Proc, ProcInner};
use super::signals::Signal;
use super::types::{
    ChildEvent, EventHandler, KernelState, ProcEvent, ProcEventKind, ProcessData, ProcessError,
    ProcessResult, ProcessState,
};
use crate::core::config::{KernelConfig, DEFAULT_SHUTDOWN_GRACE};
use crate::core::sync::WaitError;
use crate::core::types::{ExitStatus, ParentId, Pid, ProcessGroupId, SessionId, TerminalId};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

struct Lifecycle {
    state: Mutex<KernelState>,
    changed: Condvar,
}

/// Process manager.
///
/// Cheap to clone; every clone shares the same registry. A record is
/// never locked while a registry shard guard is held.
#[derive(Clone)]
pub struct ProcessManager {
    processes: Arc<DashMap<Pid, Arc<Proc>, RandomState>>,
    next_pid: Arc<AtomicU32>,
    events: EventRegistry,
    lifecycle: Arc<Lifecycle>,
    shutdown_grace: Duration,
}

/// Builder for ProcessManager
pub struct ProcessManagerBuilder {
    shutdown_grace: Duration,
}

impl ProcessManagerBuilder {
    pub fn new() -> Self {
        Self {
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Take tunables from the kernel configuration
    pub fn with_config(mut self, config: &KernelConfig) -> Self {
        self.shutdown_grace = config.shutdown_grace;
        self
    }

    /// How long shutdown waits for each process before removing it
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn build(self) -> ProcessManager {
        info!(
            shutdown_grace_ms = self.shutdown_grace.as_millis() as u64,
            "Process manager initialized"
        );
        ProcessManager {
            processes: Arc::new(DashMap::with_hasher(RandomState::new())),
            next_pid: Arc::new(AtomicU32::new(1)),
            events: EventRegistry::new(),
            lifecycle: Arc::new(Lifecycle {
                state: Mutex::new(KernelState::Running),
                changed: Condvar::new(),
            }),
            shutdown_grace: self.shutdown_grace,
        }
    }
}

impl Default for ProcessManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessManager {
    pub fn new() -> Self {
        ProcessManagerBuilder::new().build()
    }

    pub fn builder() -> ProcessManagerBuilder {
        ProcessManagerBuilder::new()
    }

    pub(super) fn get(&self, pid: Pid) -> Option<Arc<Proc>> {
        self.processes.get(&pid).map(|entry| Arc::clone(entry.value()))
    }

    fn proc(&self, pid: Pid) -> ProcessResult<Arc<Proc>> {
        self.get(pid).ok_or(ProcessError::UnknownProcess(pid))
    }

    /// Every record, ordered by pid
    pub(super) fn all_procs(&self) -> Vec<Arc<Proc>> {
        let mut procs: Vec<Arc<Proc>> = self
            .processes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        procs.sort_by_key(|p| p.id);
        procs
    }

    fn with_live<T>(
        &self,
        pid: Pid,
        f: impl FnOnce(&mut ProcInner) -> ProcessResult<T>,
    ) -> ProcessResult<T> {
        let proc = self.proc(pid)?;
        let mut inner = proc.inner.lock();
        if !inner.is_alive() {
            return Err(ProcessError::Exited(pid));
        }
        f(&mut inner)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Register a new process and link it under its parent
    pub fn register_process(
        &self,
        parent: ParentId,
        process_group_id: ProcessGroupId,
        session_id: SessionId,
        cmd: impl Into<String>,
        args: Vec<String>,
    ) -> ProcessResult<Pid> {
        if self.kernel_state() != KernelState::Running {
            return Err(ProcessError::KernelShuttingDown);
        }
        let cmd = cmd.into();

        let pid = match parent.pid() {
            None => {
                let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
                let proc = Proc::new(pid, parent, process_group_id, session_id, cmd.clone(), args);
                self.processes.insert(pid, Arc::new(proc));
                pid
            }
            Some(ppid) => {
                let parent_proc = self.proc(ppid)?;
                let mut parent_inner = parent_proc.inner.lock();
                if !parent_inner.is_alive() {
                    return Err(ProcessError::Exited(ppid));
                }
                let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
                let proc = Proc::new(pid, parent, process_group_id, session_id, cmd.clone(), args);
                self.processes.insert(pid, Arc::new(proc));
                parent_inner.children.push(pid);
                pid
            }
        };

        info!(pid, parent = %parent, pgid = process_group_id, sid = session_id, cmd = %cmd, "Registered process");
        Ok(pid)
    }

    /// Record a process exit.
    ///
    /// Calling this on a zombie reclaims it. Repeated calls for a process
    /// that is already gone or on its way out are ignored.
    pub fn deregister_process(&self, pid: Pid, exit_status: ExitStatus) -> ProcessResult<()> {
        let proc = self.proc(pid)?;

        let (event, mut handlers) = {
            let mut inner = proc.inner.lock();
            match inner.liveness {
                Liveness::Zombie(_) => {
                    drop(inner);
                    if self.reclaim_zombie(&proc).is_some() {
                        debug!(pid, "Zombie reclaimed by deregistration");
                    }
                    return Ok(());
                }
                Liveness::Exiting | Liveness::Departed => {
                    debug!(pid, "Duplicate deregistration ignored");
                    return Ok(());
                }
                Liveness::Alive => {}
            }
            inner.liveness = Liveness::Exiting;
            inner.state = ProcessState::Shutdown;
            let event = ChildEvent {
                pid,
                process_group_id: inner.process_group_id,
                state: ProcessState::Shutdown,
                exit_status,
            };
            (event, inner.handlers_for(ProcEventKind::Deregister))
        };

        handlers.extend(self.events.matching(ProcEventKind::Deregister));
        fire(&handlers, &ProcEvent::Deregister { pid });

        self.settle_exit(&proc, event);
        self.reparent_children(&proc);
        proc.cancel_waits();

        info!(pid, exit_status, "Deregistered process");
        Ok(())
    }

    /// Hand the exit to a blocked waiter, or leave a zombie behind
    fn settle_exit(&self, proc: &Arc<Proc>, event: ChildEvent) {
        loop {
            let parent_id = proc.inner.lock().parent;
            let parent = match parent_id.pid().and_then(|ppid| self.get(ppid)) {
                Some(parent) => parent,
                None => {
                    proc.inner.lock().liveness = Liveness::Departed;
                    self.processes.remove(&proc.id);
                    return;
                }
            };

            let mut parent_inner = parent.inner.lock();
            let mut inner = proc.inner.lock();
            if inner.parent != parent_id {
                // reparented while we were unlocked
                continue;
            }

            let mut handed_off = false;
            while let Some(waiter) = parent_inner.waiters.pop_front() {
                if waiter.try_send(event).is_ok() {
                    handed_off = true;
                    break;
                }
            }

            if handed_off {
                inner.liveness = Liveness::Departed;
                parent_inner.forget_child(proc.id);
                drop(inner);
                drop(parent_inner);
                self.processes.remove(&proc.id);
                debug!(pid = proc.id, parent = parent.id, "Exit handed to waiting parent");
            } else {
                inner.liveness = Liveness::Zombie(event);
                parent_inner.zombies.push_back(proc.id);
                let mut handlers = parent_inner.handlers_for(ProcEventKind::Child);
                drop(inner);
                drop(parent_inner);

                handlers.extend(self.events.matching(ProcEventKind::Child));
                parent.signals.push(Signal::Child);
                fire(&handlers, &ProcEvent::Child(event));
                debug!(pid = proc.id, parent = parent.id, "Process became a zombie");
            }
            return;
        }
    }

    /// Remove a zombie from its parent and the registry
    fn reclaim_zombie(&self, proc: &Arc<Proc>) -> Option<ChildEvent> {
        loop {
            let parent_id = proc.inner.lock().parent;
            let parent = parent_id.pid().and_then(|ppid| self.get(ppid));

            let event = match parent {
                Some(parent) => {
                    let mut parent_inner = parent.inner.lock();
                    let mut inner = proc.inner.lock();
                    if inner.parent != parent_id {
                        continue;
                    }
                    let Liveness::Zombie(event) = inner.liveness else {
                        return None;
                    };
                    inner.liveness = Liveness::Departed;
                    parent_inner.forget_child(proc.id);
                    event
                }
                None => {
                    let mut inner = proc.inner.lock();
                    let Liveness::Zombie(event) = inner.liveness else {
                        return None;
                    };
                    inner.liveness = Liveness::Departed;
                    event
                }
            };

            self.processes.remove(&proc.id);
            return Some(event);
        }
    }

    /// Move a departing process's children to root; reclaim any zombies among them
    fn reparent_children(&self, proc: &Arc<Proc>) {
        let mut reclaimed = Vec::new();
        {
            let mut inner = proc.inner.lock();
            let children = std::mem::take(&mut inner.children);
            inner.zombies.clear();
            inner.waiters.clear();

            for child_pid in children {
                let Some(child) = self.get(child_pid) else {
                    continue;
                };
                let mut child_inner = child.inner.lock();
                if child_inner.is_zombie() {
                    child_inner.liveness = Liveness::Departed;
                    reclaimed.push(child_pid);
                } else {
                    child_inner.parent = ParentId::Daemon;
                }
            }
        }

        for pid in reclaimed {
            self.processes.remove(&pid);
            debug!(pid, orphaned_by = proc.id, "Reclaimed orphaned zombie");
        }
    }

    /// Wait for any child to exit
    pub fn wait_for_child(&self, pid: Pid) -> ProcessResult<ChildEvent> {
        self.wait_for_child_timeout(pid, None)
    }

    /// Wait for any child to exit, giving up after `timeout`.
    ///
    /// A zombie child is reclaimed immediately. Otherwise the call parks
    /// on its own one-shot channel, so each exit reaches exactly one waiter.
    pub fn wait_for_child_timeout(
        &self,
        pid: Pid,
        timeout: Option<Duration>,
    ) -> ProcessResult<ChildEvent> {
        let proc = self.proc(pid)?;
        let (tx, rx) = flume::bounded(1);

        {
            let mut inner = proc.inner.lock();
            if !inner.is_alive() {
                return Err(ProcessError::Cancelled(pid));
            }

            while let Some(zombie_pid) = inner.zombies.pop_front() {
                let Some(zombie) = self.get(zombie_pid) else {
                    inner.children.retain(|&c| c != zombie_pid);
                    continue;
                };
                let mut zombie_inner = zombie.inner.lock();
                if let Liveness::Zombie(event) = zombie_inner.liveness {
                    zombie_inner.liveness = Liveness::Departed;
                    drop(zombie_inner);
                    inner.children.retain(|&c| c != zombie_pid);
                    drop(inner);
                    self.processes.remove(&zombie_pid);
                    debug!(pid, child = zombie_pid, "Reclaimed zombie child");
                    return Ok(event);
                }
            }

            if inner.children.is_empty() {
                return Err(ProcessError::NoChildren(pid));
            }
            inner.waiters.push_back(tx.clone());
        }

        match proc.wait_ctx.recv(&rx, timeout) {
            Ok(event) => Ok(event),
            Err(err) => {
                proc.inner.lock().waiters.retain(|w| !w.same_channel(&tx));
                // an exit may have landed between wake-up and withdrawal
                if let Ok(event) = rx.try_recv() {
                    return Ok(event);
                }
                Err(match err {
                    WaitError::Timeout => ProcessError::TimedOut(pid),
                    _ => ProcessError::Cancelled(pid),
                })
            }
        }
    }

    /// Validate and apply a state transition
    pub fn update_process_state(&self, pid: Pid, state: ProcessState) -> ProcessResult<()> {
        let proc = self.proc(pid)?;
        let resumed = {
            let mut inner = proc.inner.lock();
            if !inner.is_alive() {
                return Err(ProcessError::Exited(pid));
            }
            let from = inner.state;
            if !from.can_transition_to(state) {
                return Err(ProcessError::InvalidStateTransition { from, to: state });
            }
            inner.state = state;
            debug!(pid, ?from, to = ?state, "Process state updated");
            (from == ProcessState::Suspended && state == ProcessState::Running)
                .then(|| inner.handlers_for(ProcEventKind::Resume))
        };

        if let Some(mut handlers) = resumed {
            handlers.extend(self.events.matching(ProcEventKind::Resume));
            fire(&handlers, &ProcEvent::Resume { pid });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------

    /// Queue a signal on a process; `Shutdown` stops the whole kernel instead
    pub fn send_signal(&self, pid: Pid, signal: Signal) -> ProcessResult<()> {
        if signal == Signal::Shutdown {
            info!(requested_by = pid, "Shutdown signal received");
            self.request_shutdown();
            return Ok(());
        }

        let proc = self.proc(pid)?;
        if !proc.inner.lock().is_alive() || !proc.signals.push(signal) {
            return Err(ProcessError::Exited(pid));
        }
        debug!(pid, %signal, "Queued signal");
        Ok(())
    }

    /// Queue a signal on every live member of a process group
    pub fn send_signal_process_group(
        &self,
        process_group_id: ProcessGroupId,
        signal: Signal,
    ) -> ProcessResult<usize> {
        if signal == Signal::Shutdown {
            info!(pgid = process_group_id, "Shutdown signal received");
            self.request_shutdown();
            return Ok(0);
        }

        let members: Vec<Arc<Proc>> = self
            .all_procs()
            .into_iter()
            .filter(|p| {
                let inner = p.inner.lock();
                inner.is_alive() && inner.process_group_id == process_group_id
            })
            .collect();

        if members.is_empty() {
            return Err(ProcessError::UnknownProcessGroup(process_group_id));
        }

        let delivered = members.iter().filter(|p| p.signals.push(signal)).count();
        debug!(pgid = process_group_id, %signal, delivered, "Queued group signal");
        Ok(delivered)
    }

    /// Block until a signal is pending for `pid`, then remove and return the oldest
    pub fn listen_for_signal(&self, pid: Pid) -> ProcessResult<Signal> {
        self.listen_for_signal_timeout(pid, None)
    }

    pub fn listen_for_signal_timeout(
        &self,
        pid: Pid,
        timeout: Option<Duration>,
    ) -> ProcessResult<Signal> {
        let proc = self.proc(pid)?;
        proc.signals.pop(timeout).map_err(|err| match err {
            WaitError::Timeout => ProcessError::TimedOut(pid),
            _ => ProcessError::Cancelled(pid),
        })
    }

    pub fn pending_signals(&self, pid: Pid) -> ProcessResult<usize> {
        Ok(self.proc(pid)?.signals.len())
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Subscribe to one process's lifecycle events
    pub fn register_event_handler(
        &self,
        pid: Pid,
        kind: ProcEventKind,
        handler: EventHandler,
    ) -> ProcessResult<()> {
        self.with_live(pid, |inner| {
            inner.handlers.entry(kind).or_default().push(handler);
            Ok(())
        })
    }

    /// Subscribe to an event on every process; returns an id for unsubscribing
    pub fn register_global_event_handler(&self, kind: ProcEventKind, handler: EventHandler) -> u64 {
        self.events.register(kind, handler)
    }

    pub fn unregister_global_event_handler(&self, id: u64) -> bool {
        self.events.unregister(id)
    }

    // ------------------------------------------------------------------
    // Job control
    // ------------------------------------------------------------------

    pub fn set_process_group_id(&self, pid: Pid, process_group_id: ProcessGroupId) -> ProcessResult<()> {
        self.with_live(pid, |inner| {
            inner.process_group_id = process_group_id;
            Ok(())
        })
    }

    pub fn get_process_group_id(&self, pid: Pid) -> ProcessResult<ProcessGroupId> {
        Ok(self.proc(pid)?.inner.lock().process_group_id)
    }

    /// Put a process in a new session; only legal for a process with no session
    pub fn set_process_session_id(&self, pid: Pid, session_id: SessionId) -> ProcessResult<()> {
        if session_id == 0 {
            return Err(ProcessError::IllegalOperation(
                "session id 0 means no session".to_string(),
            ));
        }
        self.with_live(pid, |inner| {
            if inner.session_id != 0 {
                return Err(ProcessError::IllegalOperation(format!(
                    "process {} already belongs to session {}",
                    pid, inner.session_id
                )));
            }
            inner.session_id = session_id;
            Ok(())
        })
    }

    pub fn get_process_session_id(&self, pid: Pid) -> ProcessResult<SessionId> {
        Ok(self.proc(pid)?.inner.lock().session_id)
    }

    pub fn set_process_terminal_id(&self, pid: Pid, terminal_id: TerminalId) -> ProcessResult<()> {
        self.with_live(pid, |inner| {
            inner.terminal_id = Some(terminal_id);
            Ok(())
        })
    }

    pub fn get_process_terminal_id(&self, pid: Pid) -> ProcessResult<Option<TerminalId>> {
        Ok(self.proc(pid)?.inner.lock().terminal_id)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn get_process(&self, pid: Pid) -> ProcessResult<ProcessData> {
        Ok(self.proc(pid)?.snapshot())
    }

    /// True while a record exists for `pid`, zombies included
    pub fn exists(&self, pid: Pid) -> bool {
        self.processes.contains_key(&pid)
    }

    /// True while the process is registered and has not begun exiting
    pub fn is_alive(&self, pid: Pid) -> bool {
        self.get(pid).map_or(false, |p| p.inner.lock().is_alive())
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Snapshot of every process, ordered by pid
    pub fn get_process_data(&self) -> Vec<ProcessData> {
        self.all_procs().iter().map(|p| p.snapshot()).collect()
    }

    /// Snapshot grouped by process group id
    pub fn get_process_data_by_process_group(&self) -> BTreeMap<ProcessGroupId, Vec<ProcessData>> {
        let mut groups: BTreeMap<ProcessGroupId, Vec<ProcessData>> = BTreeMap::new();
        for data in self.get_process_data() {
            groups.entry(data.process_group_id).or_default().push(data);
        }
        groups
    }

    // ------------------------------------------------------------------
    // Kernel state
    // ------------------------------------------------------------------

    pub fn kernel_state(&self) -> KernelState {
        *self.lifecycle.state.lock()
    }

    /// Block until shutdown completes; false on timeout
    pub fn wait_for_shutdown(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lifecycle.state.lock();
        while *state != KernelState::Shutdown {
            if self.lifecycle.changed.wait_until(&mut state, deadline).timed_out() {
                return *state == KernelState::Shutdown;
            }
        }
        true
    }

    /// Running -> Stopping; false if shutdown already began
    pub(super) fn begin_stopping(&self) -> bool {
        let mut state = self.lifecycle.state.lock();
        if *state != KernelState::Running {
            return false;
        }
        *state = KernelState::Stopping;
        self.lifecycle.changed.notify_all();
        true
    }

    pub(super) fn finish_shutdown(&self) {
        *self.lifecycle.state.lock() = KernelState::Shutdown;
        self.lifecycle.changed.notify_all();
    }

    pub(super) fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// Run shutdown on its own thread so the requester is not blocked by it
    fn request_shutdown(&self) {
        let manager = self.clone();
        let spawned = std::thread::Builder::new()
            .name("kernel-shutdown".to_string())
            .spawn(move || {
                if let Err(e) = manager.shutdown() {
                    debug!(error = %e, "Shutdown request ignored");
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "Failed to start shutdown thread");
        }
    }
}
