/*!
 * Synchronization Primitives
 *
 * Wait/notify building blocks shared by the process manager and the
 * naming service. Blocking calls park on per-record primitives rather
 * than a global lock, and every indefinite wait can be cancelled through
 * a closeable [`WaitContext`].
 */

mod context;

pub use context::{WaitContext, WaitError, WaitResult};
