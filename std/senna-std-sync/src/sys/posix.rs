//!
//! POSIX backend: pthread mutexes and condition variables
//!
//! All functions operate on blocks allocated by the caller (zeroed, sized for
//! the pthread types). On Linux/Android the condition variable is initialized
//! with `CLOCK_MONOTONIC` so timed waits are immune to wall-clock jumps, and
//! `pthread_mutex_timedlock` provides a native timed acquire. Apple platforms
//! have neither; timed waits use `pthread_cond_timedwait_relative_np` and
//! timed mutex acquisition is emulated above this layer.
//!

use std::time::Duration;

use crate::error::SyncError;

pub type RawMutex = libc::pthread_mutex_t;
pub type RawCond = libc::pthread_cond_t;

fn check(rc: i32, call: &str) {
    if rc != 0 {
        panic!("{call} failed: os error {rc}");
    }
}

/// Absolute timespec `timeout` from now on the given clock.
#[cfg(not(target_vendor = "apple"))]
fn abs_timespec(clock: libc::clockid_t, timeout: Duration) -> libc::timespec {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(clock, &mut now) };
    check(rc, "clock_gettime");

    let mut sec = now.tv_sec.saturating_add(timeout.as_secs() as libc::time_t);
    let mut nsec = now.tv_nsec + timeout.subsec_nanos() as libc::c_long;
    if nsec >= 1_000_000_000 {
        sec = sec.saturating_add(1);
        nsec -= 1_000_000_000;
    }
    libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    }
}

/// Relative timespec for the Apple `_relative_np` wait.
#[cfg(target_vendor = "apple")]
fn rel_timespec(timeout: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    }
}

pub unsafe fn mutex_init(m: *mut RawMutex) {
    let rc = unsafe { libc::pthread_mutex_init(m, std::ptr::null()) };
    check(rc, "pthread_mutex_init");
}

pub unsafe fn mutex_lock(m: *mut RawMutex) {
    let rc = unsafe { libc::pthread_mutex_lock(m) };
    check(rc, "pthread_mutex_lock");
}

/// Non-blocking acquire. Returns false if the mutex is currently held.
pub unsafe fn mutex_try_lock(m: *mut RawMutex) -> bool {
    let rc = unsafe { libc::pthread_mutex_trylock(m) };
    match rc {
        0 => true,
        libc::EBUSY => false,
        _ => panic!("pthread_mutex_trylock failed: os error {rc}"),
    }
}

/// Native timed acquire (Linux/Android only; `pthread_mutex_timedlock` uses
/// `CLOCK_REALTIME` absolute times).
#[cfg(any(target_os = "linux", target_os = "android"))]
pub unsafe fn mutex_timed_lock(m: *mut RawMutex, timeout: Duration) -> Result<(), SyncError> {
    let abstime = abs_timespec(libc::CLOCK_REALTIME, timeout);
    let rc = unsafe { libc::pthread_mutex_timedlock(m, &abstime) };
    match rc {
        0 => Ok(()),
        libc::ETIMEDOUT => Err(SyncError::Timeout),
        _ => panic!("pthread_mutex_timedlock failed: os error {rc}"),
    }
}

pub unsafe fn mutex_unlock(m: *mut RawMutex) {
    let rc = unsafe { libc::pthread_mutex_unlock(m) };
    check(rc, "pthread_mutex_unlock");
}

pub unsafe fn mutex_destroy(m: *mut RawMutex) {
    // Destroying a mutex that is still locked is caller error; the result is
    // ignored because this runs on the finalizer path.
    let _ = unsafe { libc::pthread_mutex_destroy(m) };
}

pub unsafe fn cond_init(c: *mut RawCond) {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    unsafe {
        let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
        check(libc::pthread_condattr_init(&mut attr), "pthread_condattr_init");
        check(
            libc::pthread_condattr_setclock(&mut attr, libc::CLOCK_MONOTONIC),
            "pthread_condattr_setclock",
        );
        check(libc::pthread_cond_init(c, &attr), "pthread_cond_init");
        let _ = libc::pthread_condattr_destroy(&mut attr);
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        let rc = unsafe { libc::pthread_cond_init(c, std::ptr::null()) };
        check(rc, "pthread_cond_init");
    }
}

/// Block on `c`, releasing `m` atomically and re-acquiring it before return.
pub unsafe fn cond_wait(c: *mut RawCond, m: *mut RawMutex) {
    let rc = unsafe { libc::pthread_cond_wait(c, m) };
    check(rc, "pthread_cond_wait");
}

/// Timed variant of [`cond_wait`]. `ETIMEDOUT` maps to [`SyncError::Timeout`];
/// any other failure is fatal.
pub unsafe fn cond_timed_wait(
    c: *mut RawCond,
    m: *mut RawMutex,
    timeout: Duration,
) -> Result<(), SyncError> {
    #[cfg(target_vendor = "apple")]
    let rc = {
        let reltime = rel_timespec(timeout);
        unsafe { libc::pthread_cond_timedwait_relative_np(c, m, &reltime) }
    };

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let rc = {
        let abstime = abs_timespec(libc::CLOCK_MONOTONIC, timeout);
        unsafe { libc::pthread_cond_timedwait(c, m, &abstime) }
    };

    #[cfg(not(any(
        target_vendor = "apple",
        target_os = "linux",
        target_os = "android"
    )))]
    let rc = {
        let abstime = abs_timespec(libc::CLOCK_REALTIME, timeout);
        unsafe { libc::pthread_cond_timedwait(c, m, &abstime) }
    };

    match rc {
        0 => Ok(()),
        libc::ETIMEDOUT => Err(SyncError::Timeout),
        _ => panic!("pthread_cond_timedwait failed: os error {rc}"),
    }
}

/// Wake at least one waiter.
pub unsafe fn cond_signal(c: *mut RawCond) {
    let rc = unsafe { libc::pthread_cond_signal(c) };
    check(rc, "pthread_cond_signal");
}

/// Wake every waiter.
pub unsafe fn cond_broadcast(c: *mut RawCond) {
    let rc = unsafe { libc::pthread_cond_broadcast(c) };
    check(rc, "pthread_cond_broadcast");
}

pub unsafe fn cond_destroy(c: *mut RawCond) {
    let _ = unsafe { libc::pthread_cond_destroy(c) };
}
