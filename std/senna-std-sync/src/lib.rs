//!
//! senna-std-sync - Native Synchronization Primitives
//!
//! OS-backed mutexes, condition variables, and single-slot mailboxes for
//! coordinating senna tasks. Each primitive lives in explicitly managed
//! native memory outside the garbage-collected heap, so a capsule (a plain
//! address record) can carry it to another task and a materialized wrapper
//! there operates on the very same OS object.
//!
//! Layering:
//!
//! - `sys` - raw pthread / SRW operations, picked at compile time
//! - `block` - owned vs borrowed native memory, expressed in types
//! - `deadline` - timeout budgets and the poll emulation for backends
//!   without a native timed acquire
//! - `mutex`, `condvar`, `mailbox` - the primitives plus their language
//!   bindings (`senna_mutex_*`, `senna_condvar_*`, `senna_mailbox_*`)
//! - `capsule` - the transferable handle records
//!
//! Recoverable failures (timeout, full, closed) are [`SyncError`] values in
//! Rust and status codes plus typed exceptions across the `extern "C"`
//! boundary. Corrupted native state and unexpected OS errors panic.
//!

pub mod block;
pub mod capsule;
pub mod condvar;
pub mod deadline;
pub mod error;
pub mod mailbox;
pub mod mutex;
mod sys;

pub use capsule::{CondVarCapsule, MailboxCapsule, MutexCapsule};
pub use condvar::{CondVar, SennaCondVar};
pub use deadline::{Deadline, DeadlinePoll, DEFAULT_POLL_QUANTUM};
pub use error::SyncError;
pub use mailbox::{Mailbox, SennaMailbox, MAILBOX_MAGIC};
pub use mutex::{Mutex, MutexGuard, SennaMutex};

/// Status codes returned by the `senna_*` binding functions.
pub const SYNC_OK: i64 = 0;
pub const SYNC_TIMEOUT: i64 = 1;
pub const SYNC_FULL: i64 = 2;
pub const SYNC_CLOSED: i64 = 3;

/// Set the thread-local typed exception for a recoverable failure. The
/// message string becomes the exception payload, owned by the handler that
/// eventually catches or clears it.
pub(crate) fn throw_sync_error(err: SyncError) {
    let message = err.to_string();
    unsafe {
        let payload = senna_std_core::senna_string_new(message.as_ptr(), message.len());
        senna_std_core::senna_exception_set_typed(payload as *mut u8, err.exception_type_id());
    }
}
