/*!
 * Translator Mounts
 * Configured -> Starting -> Active state machine for one mount point
 */

use super::activation::Activation;
use super::traits::ServiceHandle;
use super::types::{MountInfo, MountStatus, NamingError, NamingResult};
use crate::core::types::Pid;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

enum MountState {
    Configured,
    Starting(Arc<Activation>),
    Active { pid: Pid, handle: ServiceHandle },
}

/// What a lookup must do with a mount
pub(crate) enum Claim {
    /// Translator is up
    Ready(ServiceHandle),
    /// Another lookup is starting it; wait on the shared activation
    Join(Arc<Activation>),
    /// This lookup won the race and must spawn the translator
    Spawn(Arc<Activation>),
}

pub(crate) struct TranslatorMount {
    pub path: String,
    pub command: String,
    pub args: Vec<String>,
    passive: AtomicBool,
    state: Mutex<MountState>,
}

impl TranslatorMount {
    pub fn new(path: String, command: String, args: Vec<String>, passive: bool) -> Self {
        Self {
            path,
            command,
            args,
            passive: AtomicBool::new(passive),
            state: Mutex::new(MountState::Configured),
        }
    }

    pub fn is_passive(&self) -> bool {
        self.passive.load(Ordering::Acquire)
    }

    pub fn set_passive(&self, passive: bool) {
        self.passive.store(passive, Ordering::Release);
    }

    /// Atomically decide who starts the translator
    pub fn claim(&self) -> Claim {
        let mut state = self.state.lock();
        match &*state {
            MountState::Active { handle, .. } => Claim::Ready(handle.clone()),
            MountState::Starting(activation) => Claim::Join(activation.clone()),
            MountState::Configured => {
                let activation = Arc::new(Activation::new());
                *state = MountState::Starting(activation.clone());
                Claim::Spawn(activation)
            }
        }
    }

    /// Record the spawned pid if `activation` is still the current start attempt.
    ///
    /// False means the mount was reset or failed while the spawn was in
    /// flight; the caller owns the process and must stop it.
    pub fn attach_pid(&self, activation: &Arc<Activation>, pid: Pid) -> bool {
        let state = self.state.lock();
        match &*state {
            MountState::Starting(current) if Arc::ptr_eq(current, activation) => {
                activation.set_pid(pid);
                true
            }
            _ => false,
        }
    }

    /// Self-registration of the translator process.
    ///
    /// A translator may register before its spawn has returned; the call
    /// then waits, up to `deadline`, for the pid to be attached.
    pub fn register(&self, caller: Pid, handle: ServiceHandle, deadline: Instant) -> NamingResult<()> {
        let activation = match &*self.state.lock() {
            MountState::Starting(activation) => activation.clone(),
            MountState::Active { pid, .. } => {
                return Err(NamingError::IllegalOperation(format!(
                    "{} is already served by process {}",
                    self.path, pid
                )))
            }
            MountState::Configured => {
                return Err(NamingError::IllegalOperation(format!(
                    "no translator is starting at {}",
                    self.path
                )))
            }
        };

        let expected = activation.wait_for_pid(deadline);

        let mut state = self.state.lock();
        match &*state {
            MountState::Starting(current) if Arc::ptr_eq(current, &activation) => {}
            _ => {
                return Err(NamingError::IllegalOperation(format!(
                    "start attempt at {} was superseded",
                    self.path
                )))
            }
        }
        if expected != Some(caller) {
            return Err(NamingError::IllegalOperation(format!(
                "process {} is not the translator started at {}",
                caller, self.path
            )));
        }

        *state = MountState::Active {
            pid: caller,
            handle: handle.clone(),
        };
        activation.complete(Ok(handle));
        Ok(())
    }

    /// Fail `activation` if it is still the current start attempt
    pub fn fail(&self, activation: &Arc<Activation>, error: NamingError) -> bool {
        let mut state = self.state.lock();
        match &*state {
            MountState::Starting(current) if Arc::ptr_eq(current, activation) => {
                *state = MountState::Configured;
                activation.complete(Err(error))
            }
            _ => false,
        }
    }

    /// Revert to configured if `pid` is the process serving or starting this mount
    pub fn reset_if_pid(&self, pid: Pid) -> bool {
        let mut state = self.state.lock();
        match &*state {
            MountState::Active { pid: active, .. } if *active == pid => {
                *state = MountState::Configured;
                true
            }
            MountState::Starting(activation) if activation.pid() == Some(pid) => {
                activation.complete(Err(NamingError::TranslatorFailed {
                    path: self.path.clone(),
                    reason: format!("process {} exited before registering", pid),
                }));
                *state = MountState::Configured;
                true
            }
            _ => false,
        }
    }

    /// Revert to configured unconditionally; returns the process that was running
    pub fn reset(&self) -> Option<Pid> {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut *state, MountState::Configured);
        match previous {
            MountState::Configured => None,
            MountState::Active { pid, .. } => Some(pid),
            MountState::Starting(activation) => {
                activation.complete(Err(NamingError::TranslatorFailed {
                    path: self.path.clone(),
                    reason: "mount was reset".to_string(),
                }));
                activation.pid()
            }
        }
    }

    pub fn running_pid(&self) -> Option<Pid> {
        match &*self.state.lock() {
            MountState::Configured => None,
            MountState::Starting(activation) => activation.pid(),
            MountState::Active { pid, .. } => Some(*pid),
        }
    }

    pub fn is_running(&self) -> bool {
        !matches!(*self.state.lock(), MountState::Configured)
    }

    /// Live handle, if the translator has registered
    pub fn handle(&self) -> Option<ServiceHandle> {
        match &*self.state.lock() {
            MountState::Active { handle, .. } => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn status(&self) -> MountStatus {
        match &*self.state.lock() {
            MountState::Configured => MountStatus::Configured,
            MountState::Starting(activation) => MountStatus::Starting(activation.pid()),
            MountState::Active { pid, .. } => MountStatus::Active(*pid),
        }
    }

    pub fn info(&self) -> MountInfo {
        MountInfo {
            path: self.path.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            passive: self.is_passive(),
            status: self.status(),
        }
    }
}
