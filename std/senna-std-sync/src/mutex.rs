//!
//! Mutex over a native block
//!
//! The managed wrapper owns (or borrows) one native block holding the OS
//! mutex object. Acquisition is exposed three ways: `lock` blocks forever,
//! `lock_timeout` gives up after a duration, `try_lock` never blocks. All
//! three hand back a [`MutexGuard`] that releases on drop, so a panic inside
//! a critical section still unlocks.
//!
//! Timed acquisition uses the native `pthread_mutex_timedlock` where the
//! platform has one (Linux, Android) and falls back to polling `try_lock` on
//! a short quantum everywhere else, since neither macOS nor SRW locks offer
//! a timed acquire.
//!
//! ```senna
//! let m = sync.mutex()
//! m.run_exclusive(fn() {
//!     // critical section
//! })
//! ```
//!

use std::alloc::{alloc, dealloc, Layout};
use std::time::Duration;

use senna_std_core::{HeapHeader, HeapTag};

use crate::block::{BlockHandle, BlockRef, OwnedBlock};
use crate::capsule::MutexCapsule;
use crate::error::SyncError;
use crate::sys;
use crate::{throw_sync_error, SYNC_OK};

#[cfg(not(any(target_os = "linux", target_os = "android")))]
use crate::deadline::{DeadlinePoll, DEFAULT_POLL_QUANTUM};

/// A mutual exclusion lock backed by explicitly managed native memory.
pub struct Mutex {
    block: BlockHandle<sys::RawMutex>,
}

// The OS object is designed for cross-thread use; the wrapper adds nothing
// thread-affine.
unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

impl Mutex {
    /// Allocate a native block and initialize an OS mutex in it.
    pub fn new() -> Self {
        let block = OwnedBlock::zeroed();
        unsafe { sys::mutex_init(block.as_ptr()) };
        tracing::trace!(addr = block.addr(), "mutex created");
        Self {
            block: BlockHandle::Owned(block),
        }
    }

    pub(crate) fn raw(&self) -> *mut sys::RawMutex {
        self.block.as_ptr()
    }

    /// Stable address of the backing native block.
    pub fn addr(&self) -> usize {
        self.block.addr()
    }

    /// Block until the mutex is acquired.
    pub fn lock(&self) -> MutexGuard<'_> {
        unsafe { sys::mutex_lock(self.raw()) };
        MutexGuard { mutex: self }
    }

    /// Block until the mutex is acquired or `timeout` elapses.
    pub fn lock_timeout(&self, timeout: Duration) -> Result<MutexGuard<'_>, SyncError> {
        self.acquire_timed(timeout)?;
        Ok(MutexGuard { mutex: self })
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn acquire_timed(&self, timeout: Duration) -> Result<(), SyncError> {
        unsafe { sys::mutex_timed_lock(self.raw(), timeout) }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn acquire_timed(&self, timeout: Duration) -> Result<(), SyncError> {
        DeadlinePoll::new(timeout, DEFAULT_POLL_QUANTUM)
            .run(|| unsafe { sys::mutex_try_lock(self.raw()) })
    }

    /// Acquire without blocking. Returns `None` if the mutex is held.
    pub fn try_lock(&self) -> Option<MutexGuard<'_>> {
        if unsafe { sys::mutex_try_lock(self.raw()) } {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Run `action` while holding the mutex.
    pub fn run_exclusive<R>(&self, action: impl FnOnce() -> R) -> R {
        let guard = self.lock();
        let result = action();
        drop(guard);
        result
    }

    /// Run `action` while holding the mutex, giving up acquisition after
    /// `timeout`. The action itself is not subject to the timeout.
    pub fn run_exclusive_timeout<R>(
        &self,
        timeout: Duration,
        action: impl FnOnce() -> R,
    ) -> Result<R, SyncError> {
        let guard = self.lock_timeout(timeout)?;
        let result = action();
        drop(guard);
        Ok(result)
    }

    /// Release the mutex without a guard.
    ///
    /// Used by the language binding, where the guard cannot cross the call
    /// boundary. The caller must currently hold the lock.
    pub unsafe fn force_unlock(&self) {
        unsafe { sys::mutex_unlock(self.raw()) };
    }

    /// Package this mutex for transfer to another task.
    pub fn to_capsule(&self) -> MutexCapsule {
        MutexCapsule {
            addr: self.addr() as u64,
        }
    }

    /// Rebuild a wrapper from a transferred capsule. The new wrapper borrows
    /// the native block and never frees it.
    ///
    /// The caller must guarantee the creating task's wrapper is still alive.
    pub unsafe fn from_capsule(capsule: MutexCapsule) -> Self {
        let block = unsafe { BlockRef::from_addr(capsule.addr as usize) };
        tracing::trace!(addr = capsule.addr, "mutex materialized from capsule");
        Self {
            block: BlockHandle::Borrowed(block),
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        if self.block.is_owned() {
            unsafe { sys::mutex_destroy(self.raw()) };
            tracing::trace!(addr = self.addr(), "mutex destroyed");
        }
    }
}

/// RAII handle to a held mutex. Releases the lock on drop.
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl MutexGuard<'_> {
    pub(crate) fn mutex(&self) -> &Mutex {
        self.mutex
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        unsafe { sys::mutex_unlock(self.mutex.raw()) };
    }
}

/// Language-visible mutex object.
#[repr(C)]
pub struct SennaMutex {
    pub header: HeapHeader,
    pub(crate) inner: Mutex,
}

/// Create a new mutex with refcount 1.
#[unsafe(no_mangle)]
pub extern "C" fn senna_mutex_new() -> *mut SennaMutex {
    unsafe {
        let layout = Layout::new::<SennaMutex>();
        let ptr = alloc(layout) as *mut SennaMutex;
        if ptr.is_null() {
            panic!("Failed to allocate mutex");
        }
        std::ptr::write(
            ptr,
            SennaMutex {
                header: HeapHeader::new(HeapTag::Mutex),
                inner: Mutex::new(),
            },
        );
        ptr
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mutex_incref(m: *mut SennaMutex) {
    if !m.is_null() {
        unsafe { (*m).header.incref() };
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mutex_decref(m: *mut SennaMutex) {
    if m.is_null() {
        return;
    }
    unsafe {
        if (*m).header.decref() {
            std::ptr::drop_in_place(m);
            dealloc(m as *mut u8, Layout::new::<SennaMutex>());
        }
    }
}

/// Acquire the mutex. Negative `timeout_ms` means wait forever. On timeout
/// the status code is returned and a typed timeout exception is set.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mutex_lock(m: *mut SennaMutex, timeout_ms: i64) -> i64 {
    if m.is_null() {
        return SYNC_OK;
    }
    let inner = unsafe { &(*m).inner };
    if timeout_ms < 0 {
        std::mem::forget(inner.lock());
        return SYNC_OK;
    }
    match inner.lock_timeout(Duration::from_millis(timeout_ms as u64)) {
        Ok(guard) => {
            std::mem::forget(guard);
            SYNC_OK
        }
        Err(err) => {
            throw_sync_error(err);
            err.status_code()
        }
    }
}

/// Acquire without blocking. Returns 1 on success, 0 if the mutex is held.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mutex_try_lock(m: *mut SennaMutex) -> i64 {
    if m.is_null() {
        return 0;
    }
    match unsafe { &(*m).inner }.try_lock() {
        Some(guard) => {
            std::mem::forget(guard);
            1
        }
        None => 0,
    }
}

/// Release the mutex. The calling task must hold it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mutex_unlock(m: *mut SennaMutex) {
    if !m.is_null() {
        unsafe { (*m).inner.force_unlock() };
    }
}

/// Capsule address for task transfer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mutex_to_capsule(m: *mut SennaMutex) -> u64 {
    if m.is_null() {
        return 0;
    }
    unsafe { (*m).inner.to_capsule().addr }
}

/// Rebuild a mutex object from a capsule address received from another task.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mutex_from_capsule(addr: u64) -> *mut SennaMutex {
    if addr == 0 {
        return std::ptr::null_mut();
    }
    unsafe {
        let layout = Layout::new::<SennaMutex>();
        let ptr = alloc(layout) as *mut SennaMutex;
        if ptr.is_null() {
            panic!("Failed to allocate mutex");
        }
        std::ptr::write(
            ptr,
            SennaMutex {
                header: HeapHeader::new(HeapTag::Mutex),
                inner: Mutex::from_capsule(MutexCapsule { addr }),
            },
        );
        ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_lock_and_unlock() {
        let m = Mutex::new();
        {
            let _guard = m.lock();
            assert!(m.try_lock().is_none());
        }
        assert!(m.try_lock().is_some());
    }

    #[test]
    fn test_lock_timeout_on_held_mutex() {
        let m = Mutex::new();
        thread::scope(|s| {
            let guard = m.lock();
            s.spawn(|| {
                let start = Instant::now();
                let result = m.lock_timeout(Duration::from_millis(50));
                assert!(matches!(result, Err(SyncError::Timeout)));
                assert!(start.elapsed() >= Duration::from_millis(50));
            });
            thread::sleep(Duration::from_millis(200));
            drop(guard);
        });
        assert!(m.lock_timeout(Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn test_run_exclusive_serializes_threads() {
        let m = Mutex::new();
        let counter = AtomicU64::new(0);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        m.run_exclusive(|| {
                            // Non-atomic read-modify-write under the lock.
                            let v = counter.load(Ordering::Relaxed);
                            counter.store(v + 1, Ordering::Relaxed);
                        });
                    }
                });
            }
        });
        assert_eq!(counter.load(Ordering::Relaxed), 8000);
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let m = Mutex::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            m.run_exclusive(|| panic!("inside critical section"));
        }));
        assert!(result.is_err());
        assert!(m.try_lock().is_some());
    }

    #[test]
    fn test_capsule_shares_the_same_lock() {
        let m = Mutex::new();
        let capsule = m.to_capsule();
        let guard = m.lock();
        thread::scope(|s| {
            s.spawn(move || {
                let view = unsafe { Mutex::from_capsule(capsule) };
                assert!(view.try_lock().is_none());
            });
        });
        drop(guard);
        let view = unsafe { Mutex::from_capsule(capsule) };
        assert!(view.try_lock().is_some());
    }

    #[test]
    fn test_ffi_lock_timeout_sets_exception() {
        unsafe {
            let m = senna_mutex_new();
            assert_eq!(senna_mutex_lock(m, -1), SYNC_OK);

            let addr = m as usize;
            let handle = thread::spawn(move || unsafe {
                let m = addr as *mut SennaMutex;
                let status = senna_mutex_lock(m, 40);
                // The typed exception lives in the failing thread.
                let typed = senna_std_core::senna_exception_is_type(
                    senna_std_core::EXCEPTION_TYPE_TIMEOUT_ERROR,
                );
                senna_std_core::senna_exception_clear();
                (status, typed)
            });
            let (status, typed) = handle.join().unwrap();
            assert_eq!(status, crate::SYNC_TIMEOUT);
            assert_eq!(typed, 1);

            senna_mutex_unlock(m);
            assert_eq!(senna_mutex_try_lock(m), 1);
            senna_mutex_unlock(m);
            senna_mutex_decref(m);
        }
    }

    #[test]
    fn test_ffi_capsule_round_trip() {
        unsafe {
            let m = senna_mutex_new();
            let capsule = senna_mutex_to_capsule(m);
            assert_ne!(capsule, 0);

            let view = senna_mutex_from_capsule(capsule);
            assert_eq!(senna_mutex_lock(view, -1), SYNC_OK);
            assert_eq!(senna_mutex_try_lock(m), 0);
            senna_mutex_unlock(view);

            // Dropping the borrowed view must not free the native block.
            senna_mutex_decref(view);
            assert_eq!(senna_mutex_try_lock(m), 1);
            senna_mutex_unlock(m);
            senna_mutex_decref(m);
        }
    }
}
