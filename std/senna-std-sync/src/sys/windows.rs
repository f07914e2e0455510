//!
//! Windows backend: SRWLOCK and CONDITION_VARIABLE
//!
//! Both objects are valid when zero-initialized, so init/destroy are no-ops
//! over the caller's zeroed block. SRWLOCK has no timed acquire at all;
//! timed mutex acquisition is emulated above this layer via the poll
//! strategy. `SleepConditionVariableSRW` reports expiry through
//! `ERROR_TIMEOUT`, which is the only error translated rather than treated
//! as fatal.
//!

use std::time::Duration;

use windows_sys::Win32::Foundation::{GetLastError, ERROR_TIMEOUT};
use windows_sys::Win32::System::Threading::{
    AcquireSRWLockExclusive, ReleaseSRWLockExclusive, SleepConditionVariableSRW,
    TryAcquireSRWLockExclusive, WakeAllConditionVariable, WakeConditionVariable,
    CONDITION_VARIABLE, INFINITE, SRWLOCK,
};

use crate::error::SyncError;

pub type RawMutex = SRWLOCK;
pub type RawCond = CONDITION_VARIABLE;

/// Round up to whole milliseconds, clamped below `INFINITE`.
fn millis_ceil(timeout: Duration) -> u32 {
    let ms = timeout.as_nanos().div_ceil(1_000_000);
    u32::try_from(ms).unwrap_or(INFINITE - 1).min(INFINITE - 1)
}

pub unsafe fn mutex_init(_m: *mut RawMutex) {
    // A zeroed block is SRWLOCK_INIT.
}

pub unsafe fn mutex_lock(m: *mut RawMutex) {
    unsafe { AcquireSRWLockExclusive(m) };
}

/// Non-blocking acquire. Returns false if the lock is currently held.
pub unsafe fn mutex_try_lock(m: *mut RawMutex) -> bool {
    unsafe { TryAcquireSRWLockExclusive(m) != 0 }
}

pub unsafe fn mutex_unlock(m: *mut RawMutex) {
    unsafe { ReleaseSRWLockExclusive(m) };
}

pub unsafe fn mutex_destroy(_m: *mut RawMutex) {
    // SRW locks have no destroy call.
}

pub unsafe fn cond_init(_c: *mut RawCond) {
    // A zeroed block is CONDITION_VARIABLE_INIT.
}

/// Block on `c`, releasing `m` atomically and re-acquiring it before return.
pub unsafe fn cond_wait(c: *mut RawCond, m: *mut RawMutex) {
    let ok = unsafe { SleepConditionVariableSRW(c, m, INFINITE, 0) };
    if ok == 0 {
        let code = unsafe { GetLastError() };
        panic!("SleepConditionVariableSRW failed: os error {code}");
    }
}

/// Timed variant of [`cond_wait`]. `ERROR_TIMEOUT` maps to
/// [`SyncError::Timeout`]; any other failure is fatal.
pub unsafe fn cond_timed_wait(
    c: *mut RawCond,
    m: *mut RawMutex,
    timeout: Duration,
) -> Result<(), SyncError> {
    let ok = unsafe { SleepConditionVariableSRW(c, m, millis_ceil(timeout), 0) };
    if ok != 0 {
        return Ok(());
    }
    let code = unsafe { GetLastError() };
    if code == ERROR_TIMEOUT {
        Err(SyncError::Timeout)
    } else {
        panic!("SleepConditionVariableSRW failed: os error {code}");
    }
}

/// Wake at least one waiter.
pub unsafe fn cond_signal(c: *mut RawCond) {
    unsafe { WakeConditionVariable(c) };
}

/// Wake every waiter.
pub unsafe fn cond_broadcast(c: *mut RawCond) {
    unsafe { WakeAllConditionVariable(c) };
}

pub unsafe fn cond_destroy(_c: *mut RawCond) {
    // Condition variables have no destroy call.
}
