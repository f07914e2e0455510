//!
//! Condition variable over a native block
//!
//! Waits release the associated mutex atomically and re-acquire it before
//! returning. Wakeups are advisory: the OS may wake a waiter spuriously and
//! a notification may arrive for a condition that another thread has already
//! consumed, so callers always re-check their predicate in a loop. The timed
//! wait maps the platform's timeout report to [`SyncError::Timeout`] and
//! treats every other failure as fatal.
//!

use std::alloc::{alloc, dealloc, Layout};
use std::time::Duration;

use senna_std_core::{HeapHeader, HeapTag};

use crate::block::{BlockHandle, BlockRef, OwnedBlock};
use crate::capsule::CondVarCapsule;
use crate::error::SyncError;
use crate::mutex::{Mutex, MutexGuard, SennaMutex};
use crate::sys;
use crate::{throw_sync_error, SYNC_OK};

/// A condition variable backed by explicitly managed native memory.
pub struct CondVar {
    block: BlockHandle<sys::RawCond>,
}

unsafe impl Send for CondVar {}
unsafe impl Sync for CondVar {}

impl CondVar {
    /// Allocate a native block and initialize an OS condition variable in it.
    pub fn new() -> Self {
        let block = OwnedBlock::zeroed();
        unsafe { sys::cond_init(block.as_ptr()) };
        tracing::trace!(addr = block.addr(), "condvar created");
        Self {
            block: BlockHandle::Owned(block),
        }
    }

    fn raw(&self) -> *mut sys::RawCond {
        self.block.as_ptr()
    }

    /// Stable address of the backing native block.
    pub fn addr(&self) -> usize {
        self.block.addr()
    }

    /// Release the guard's mutex and block until notified. The mutex is held
    /// again when this returns. Callers re-check their predicate afterwards.
    pub fn wait(&self, guard: &mut MutexGuard<'_>) {
        unsafe { sys::cond_wait(self.raw(), guard.mutex().raw()) };
    }

    /// Like [`CondVar::wait`] with an upper bound on the blocked time.
    pub fn wait_timeout(
        &self,
        guard: &mut MutexGuard<'_>,
        timeout: Duration,
    ) -> Result<(), SyncError> {
        unsafe { sys::cond_timed_wait(self.raw(), guard.mutex().raw(), timeout) }
    }

    /// Guardless wait for the language binding, where the lock is held
    /// without a guard in scope. The caller must hold `mutex`.
    pub unsafe fn wait_raw(
        &self,
        mutex: &Mutex,
        timeout: Option<Duration>,
    ) -> Result<(), SyncError> {
        match timeout {
            None => {
                unsafe { sys::cond_wait(self.raw(), mutex.raw()) };
                Ok(())
            }
            Some(timeout) => unsafe { sys::cond_timed_wait(self.raw(), mutex.raw(), timeout) },
        }
    }

    /// Wake at least one waiter, if any.
    pub fn notify_one(&self) {
        unsafe { sys::cond_signal(self.raw()) };
    }

    /// Wake every current waiter.
    pub fn notify_all(&self) {
        unsafe { sys::cond_broadcast(self.raw()) };
    }

    /// Package this condition variable for transfer to another task.
    pub fn to_capsule(&self) -> CondVarCapsule {
        CondVarCapsule {
            addr: self.addr() as u64,
        }
    }

    /// Rebuild a wrapper from a transferred capsule. The new wrapper borrows
    /// the native block and never frees it.
    ///
    /// The caller must guarantee the creating task's wrapper is still alive.
    pub unsafe fn from_capsule(capsule: CondVarCapsule) -> Self {
        let block = unsafe { BlockRef::from_addr(capsule.addr as usize) };
        tracing::trace!(addr = capsule.addr, "condvar materialized from capsule");
        Self {
            block: BlockHandle::Borrowed(block),
        }
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CondVar {
    fn drop(&mut self) {
        if self.block.is_owned() {
            unsafe { sys::cond_destroy(self.raw()) };
            tracing::trace!(addr = self.addr(), "condvar destroyed");
        }
    }
}

/// Language-visible condition variable object.
#[repr(C)]
pub struct SennaCondVar {
    pub header: HeapHeader,
    inner: CondVar,
}

/// Create a new condition variable with refcount 1.
#[unsafe(no_mangle)]
pub extern "C" fn senna_condvar_new() -> *mut SennaCondVar {
    unsafe {
        let layout = Layout::new::<SennaCondVar>();
        let ptr = alloc(layout) as *mut SennaCondVar;
        if ptr.is_null() {
            panic!("Failed to allocate condition variable");
        }
        std::ptr::write(
            ptr,
            SennaCondVar {
                header: HeapHeader::new(HeapTag::CondVar),
                inner: CondVar::new(),
            },
        );
        ptr
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_condvar_incref(cv: *mut SennaCondVar) {
    if !cv.is_null() {
        unsafe { (*cv).header.incref() };
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_condvar_decref(cv: *mut SennaCondVar) {
    if cv.is_null() {
        return;
    }
    unsafe {
        if (*cv).header.decref() {
            std::ptr::drop_in_place(cv);
            dealloc(cv as *mut u8, Layout::new::<SennaCondVar>());
        }
    }
}

/// Wait on the condition variable. The calling task must hold `m`. Negative
/// `timeout_ms` means wait forever. On timeout the status code is returned
/// and a typed timeout exception is set; the mutex is held either way.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_condvar_wait(
    cv: *mut SennaCondVar,
    m: *mut SennaMutex,
    timeout_ms: i64,
) -> i64 {
    if cv.is_null() || m.is_null() {
        return SYNC_OK;
    }
    let timeout = if timeout_ms < 0 {
        None
    } else {
        Some(Duration::from_millis(timeout_ms as u64))
    };
    match unsafe { (*cv).inner.wait_raw(&(*m).inner, timeout) } {
        Ok(()) => SYNC_OK,
        Err(err) => {
            throw_sync_error(err);
            err.status_code()
        }
    }
}

/// Wake at least one waiter.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_condvar_notify(cv: *mut SennaCondVar) {
    if !cv.is_null() {
        unsafe { (*cv).inner.notify_one() };
    }
}

/// Wake every current waiter.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_condvar_notify_all(cv: *mut SennaCondVar) {
    if !cv.is_null() {
        unsafe { (*cv).inner.notify_all() };
    }
}

/// Capsule address for task transfer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_condvar_to_capsule(cv: *mut SennaCondVar) -> u64 {
    if cv.is_null() {
        return 0;
    }
    unsafe { (*cv).inner.to_capsule().addr }
}

/// Rebuild a condition variable object from a capsule address received from
/// another task.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_condvar_from_capsule(addr: u64) -> *mut SennaCondVar {
    if addr == 0 {
        return std::ptr::null_mut();
    }
    unsafe {
        let layout = Layout::new::<SennaCondVar>();
        let ptr = alloc(layout) as *mut SennaCondVar;
        if ptr.is_null() {
            panic!("Failed to allocate condition variable");
        }
        std::ptr::write(
            ptr,
            SennaCondVar {
                header: HeapHeader::new(HeapTag::CondVar),
                inner: CondVar::from_capsule(CondVarCapsule { addr }),
            },
        );
        ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wait_timeout_expires() {
        let m = Mutex::new();
        let cv = CondVar::new();
        let mut guard = m.lock();
        let start = Instant::now();
        let result = cv.wait_timeout(&mut guard, Duration::from_millis(50));
        assert!(matches!(result, Err(SyncError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(50));
        drop(guard);
        // The mutex was re-acquired by the wait and released by the guard.
        assert!(m.try_lock().is_some());
    }

    #[test]
    fn test_notify_one_wakes_a_waiter() {
        let m = Mutex::new();
        let cv = CondVar::new();
        let ready = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                let mut guard = m.lock();
                while !ready.load(Ordering::Relaxed) {
                    cv.wait_timeout(&mut guard, Duration::from_secs(10))
                        .expect("waiter starved");
                }
            });

            thread::sleep(Duration::from_millis(50));
            let guard = m.lock();
            ready.store(true, Ordering::Relaxed);
            cv.notify_one();
            drop(guard);
        });
    }

    #[test]
    fn test_notify_all_wakes_every_waiter() {
        let m = Mutex::new();
        let cv = CondVar::new();
        let ready = AtomicBool::new(false);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let mut guard = m.lock();
                    while !ready.load(Ordering::Relaxed) {
                        cv.wait_timeout(&mut guard, Duration::from_secs(10))
                            .expect("waiter starved");
                    }
                });
            }

            thread::sleep(Duration::from_millis(50));
            let guard = m.lock();
            ready.store(true, Ordering::Relaxed);
            cv.notify_all();
            drop(guard);
        });
    }

    #[test]
    fn test_ffi_wait_and_notify_across_threads() {
        use crate::mutex::{senna_mutex_decref, senna_mutex_lock, senna_mutex_new,
            senna_mutex_unlock};

        unsafe {
            let m = senna_mutex_new();
            let cv = senna_condvar_new();
            let ready = Box::into_raw(Box::new(AtomicBool::new(false)));
            let m_addr = m as usize;
            let cv_addr = cv as usize;
            let ready_addr = ready as usize;

            let waiter = thread::spawn(move || unsafe {
                let m = m_addr as *mut SennaMutex;
                let cv = cv_addr as *mut SennaCondVar;
                let ready = &*(ready_addr as *const AtomicBool);
                senna_mutex_lock(m, -1);
                let mut status = SYNC_OK;
                while status == SYNC_OK && !ready.load(Ordering::Relaxed) {
                    status = senna_condvar_wait(cv, m, 10_000);
                }
                senna_mutex_unlock(m);
                status
            });

            thread::sleep(Duration::from_millis(50));
            senna_mutex_lock(m, -1);
            (*ready).store(true, Ordering::Relaxed);
            senna_condvar_notify_all(cv);
            senna_mutex_unlock(m);

            assert_eq!(waiter.join().unwrap(), SYNC_OK);
            senna_condvar_decref(cv);
            senna_mutex_decref(m);
            drop(Box::from_raw(ready));
        }
    }
}
