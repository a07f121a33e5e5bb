/*!
 * Translator Activation
 * Single-flight start of one translator, shared by every waiting lookup
 */

use super::traits::ServiceHandle;
use super::types::NamingResult;
use crate::core::types::{Pid, KERNEL_PID};
use parking_lot::{Condvar, Mutex};
use std::time::Instant;

struct ActivationState {
    pid: Option<Pid>,
    outcome: Option<NamingResult<ServiceHandle>>,
}

/// What a waiting lookup learned
pub(crate) enum ActivationWait {
    Ready(NamingResult<ServiceHandle>),
    /// The caller is the translator being started
    SelfReference,
    TimedOut,
}

/// One in-flight translator start.
///
/// Completed exactly once, by registration, failure, or timeout;
/// every waiter observes the same outcome.
pub(crate) struct Activation {
    state: Mutex<ActivationState>,
    changed: Condvar,
}

impl Activation {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ActivationState {
                pid: None,
                outcome: None,
            }),
            changed: Condvar::new(),
        }
    }

    /// Record the spawned pid and wake waiters so the translator's own
    /// lookups can see through to the node beneath
    pub fn set_pid(&self, pid: Pid) {
        self.state.lock().pid = Some(pid);
        self.changed.notify_all();
    }

    pub fn pid(&self) -> Option<Pid> {
        self.state.lock().pid
    }

    /// Resolve the activation; false if it was already resolved
    pub fn complete(&self, outcome: NamingResult<ServiceHandle>) -> bool {
        let mut state = self.state.lock();
        if state.outcome.is_some() {
            return false;
        }
        state.outcome = Some(outcome);
        self.changed.notify_all();
        true
    }

    pub fn outcome(&self) -> Option<NamingResult<ServiceHandle>> {
        self.state.lock().outcome.clone()
    }

    /// Block until the spawned pid is known or the activation resolves
    pub fn wait_for_pid(&self, deadline: Instant) -> Option<Pid> {
        let mut state = self.state.lock();
        while state.pid.is_none() && state.outcome.is_none() {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.pid
    }

    /// Block until resolved, the caller turns out to be the translator, or the deadline passes
    pub fn wait(&self, caller: Pid, deadline: Instant) -> ActivationWait {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return ActivationWait::Ready(outcome.clone());
            }
            if caller != KERNEL_PID && state.pid == Some(caller) {
                return ActivationWait::SelfReference;
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return match &state.outcome {
                    Some(outcome) => ActivationWait::Ready(outcome.clone()),
                    None => ActivationWait::TimedOut,
                };
            }
        }
    }
}
