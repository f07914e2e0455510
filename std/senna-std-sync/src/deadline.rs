//!
//! Deadline tracking and timeout emulation
//!
//! Every blocking operation with a timeout measures its remaining budget
//! against a `Deadline`: a monotonic countdown started when the operation
//! begins. Waiting loops re-derive the remaining time from the clock on each
//! iteration instead of re-applying the original duration.
//!
//! `DeadlinePoll` is the emulation strategy for backends without a native
//! timed acquire (SRWLOCK on Windows, pthread mutexes on macOS): repeatedly
//! try a non-blocking acquire, sleeping at most one quantum between attempts,
//! until the deadline passes.
//!

use std::thread;
use std::time::{Duration, Instant};

use crate::error::SyncError;

/// Sleep quantum between try-acquire attempts when emulating a timed lock.
pub const DEFAULT_POLL_QUANTUM: Duration = Duration::from_millis(1);

/// Monotonic countdown for one blocking operation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    pub fn new(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.start.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Poll-until-deadline strategy for backends lacking a native timed acquire.
///
/// The final attempt happens after the last sleep, so the loop never gives up
/// early, and each sleep is capped at `min(remaining, quantum)`, so it never
/// oversleeps the deadline by more than one quantum.
#[derive(Debug)]
pub struct DeadlinePoll {
    deadline: Deadline,
    quantum: Duration,
}

impl DeadlinePoll {
    pub fn new(timeout: Duration, quantum: Duration) -> Self {
        Self {
            deadline: Deadline::new(timeout),
            quantum,
        }
    }

    /// Run `try_acquire` until it succeeds or the deadline passes.
    pub fn run(&self, mut try_acquire: impl FnMut() -> bool) -> Result<(), SyncError> {
        loop {
            if try_acquire() {
                return Ok(());
            }
            let remaining = self.deadline.remaining();
            if remaining.is_zero() {
                return Err(SyncError::Timeout);
            }
            thread::sleep(remaining.min(self.quantum));
        }
    }
}
