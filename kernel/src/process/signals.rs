/*!
 * Process Signals
 * Kernel signal set and per-process FIFO pending queues
 */

use crate::core::sync::{WaitError, WaitResult};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Signals understood by process runtimes.
///
/// The numbering is kernel-private; no POSIX mapping is implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Controlling terminal went away
    Hangup,
    /// Interrupt from the terminal
    Interrupt,
    /// Polite request to exit
    Terminate,
    /// Exit now
    Kill,
    /// Job-control stop
    Stop,
    /// Resume after a stop
    Continue,
    /// A child changed state
    Child,
    /// Whole-kernel shutdown; never queued on a process
    Shutdown,
}

impl Signal {
    /// Check if the default action ends the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Signal::Hangup | Signal::Interrupt | Signal::Terminate | Signal::Kill
        )
    }

    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Signal::Hangup => "Hangup",
            Signal::Interrupt => "Interrupt",
            Signal::Terminate => "Terminated",
            Signal::Kill => "Killed",
            Signal::Stop => "Stopped",
            Signal::Continue => "Continued",
            Signal::Child => "Child status changed",
            Signal::Shutdown => "Kernel shutdown",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

struct QueueState {
    pending: VecDeque<Signal>,
    closed: bool,
}

/// Pending-signal queue with a blocking listener
pub(crate) struct SignalQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl SignalQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Enqueue and wake one listener; false once the queue is closed
    pub(crate) fn push(&self, signal: Signal) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.pending.push_back(signal);
        self.ready.notify_one();
        true
    }

    /// Remove the oldest signal, blocking until one arrives
    pub(crate) fn pop(&self, timeout: Option<Duration>) -> WaitResult<Signal> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(WaitError::Cancelled);
            }
            if let Some(signal) = state.pending.pop_front() {
                return Ok(signal);
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out() {
                        return state.pending.pop_front().ok_or(WaitError::Timeout);
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }
    }

    /// Close the queue and release every blocked listener
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.clear();
        self.ready.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().pending.len()
    }
}
