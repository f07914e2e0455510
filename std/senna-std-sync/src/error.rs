//!
//! Error taxonomy for the synchronization primitives
//!
//! Only the recoverable failures appear here. Corruption of a native block
//! (bad magic) and unexpected OS errors from the lock/condvar calls are
//! unrecoverable and panic with the raw detail instead; the release profile
//! turns those panics into aborts.
//!

use senna_std_core::{
    EXCEPTION_TYPE_MAILBOX_CLOSED, EXCEPTION_TYPE_MAILBOX_FULL, EXCEPTION_TYPE_TIMEOUT_ERROR,
};
use thiserror::Error;

use crate::{SYNC_CLOSED, SYNC_FULL, SYNC_TIMEOUT};

/// Recoverable failures returned by lock, wait, and mailbox operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A bounded wait elapsed without its predicate being satisfied.
    #[error("operation timed out")]
    Timeout,
    /// A put was attempted on a mailbox already holding a message.
    #[error("mailbox already holds a message")]
    Full,
    /// The mailbox has been closed (and, for take, is also empty).
    #[error("mailbox is closed")]
    Closed,
}

impl SyncError {
    /// Status code returned across the `extern "C"` boundary.
    pub fn status_code(self) -> i64 {
        match self {
            SyncError::Timeout => SYNC_TIMEOUT,
            SyncError::Full => SYNC_FULL,
            SyncError::Closed => SYNC_CLOSED,
        }
    }

    /// Exception type id used when this error is thrown into senna code.
    pub fn exception_type_id(self) -> i64 {
        match self {
            SyncError::Timeout => EXCEPTION_TYPE_TIMEOUT_ERROR,
            SyncError::Full => EXCEPTION_TYPE_MAILBOX_FULL,
            SyncError::Closed => EXCEPTION_TYPE_MAILBOX_CLOSED,
        }
    }
}
