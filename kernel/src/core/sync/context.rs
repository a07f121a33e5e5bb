/*!
 * Closeable Wait Context
 *
 * A per-record cancellation handle for blocking kernel calls. Closing the
 * context drops its internal sender, which disconnects every receiver at
 * once, so a thread parked in `recv` wakes up without relying on thread
 * interruption.
 */

use flume::{Receiver, Selector, Sender};
use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Result type for wait operations
pub type WaitResult<T> = Result<T, WaitError>;

/// Wait operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("Wait operation timed out")]
    Timeout,

    #[error("Wait was cancelled")]
    Cancelled,

    #[error("Wake source disconnected")]
    Disconnected,
}

enum Woken<T> {
    Value(T),
    Closed,
    Disconnected,
}

/// Closeable wait context
pub struct WaitContext {
    closer: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
}

impl WaitContext {
    pub fn new() -> Self {
        let (closer, closed) = flume::bounded(0);
        Self {
            closer: Mutex::new(Some(closer)),
            closed,
        }
    }

    /// Close the context; returns false if it was already closed
    pub fn close(&self) -> bool {
        self.closer.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closer.lock().is_none()
    }

    /// Block until `rx` yields a value, the context closes, or `timeout` expires.
    ///
    /// A value that is already queued wins over a concurrent close.
    pub fn recv<T>(&self, rx: &Receiver<T>, timeout: Option<Duration>) -> WaitResult<T> {
        let selector = Selector::new()
            .recv(rx, |res| match res {
                Ok(value) => Woken::Value(value),
                Err(_) => Woken::Disconnected,
            })
            .recv(&self.closed, |_| Woken::Closed);

        let woken = match timeout {
            Some(timeout) => selector.wait_timeout(timeout).map_err(|_| WaitError::Timeout)?,
            None => selector.wait(),
        };

        match woken {
            Woken::Value(value) => Ok(value),
            Woken::Closed => rx.try_recv().map_err(|_| WaitError::Cancelled),
            Woken::Disconnected => Err(WaitError::Disconnected),
        }
    }
}

impl Default for WaitContext {
    fn default() -> Self {
        Self::new()
    }
}
