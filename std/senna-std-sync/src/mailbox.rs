//!
//! Mailbox - single-slot message channel between tasks
//!
//! A mailbox holds at most one pending message: a byte payload copied into
//! native memory on `put` and copied back out (then freed) on `take`. State
//! lives in one native block guarded by a [`Mutex`] and a [`CondVar`], so
//! any number of tasks can put and take concurrently through capsules.
//!
//! Lifecycle: a mailbox is open until `close`, which is idempotent and
//! permanent. Closing does not discard a pending message; a take that finds
//! a message drains it even after close, and only an *empty* closed mailbox
//! rejects takers. Puts are rejected the moment the mailbox closes.
//!
//! The state block begins with a magic sentinel. Every operation checks it
//! before touching any other field and panics on mismatch, which is how a
//! capsule materialized after the owner's finalizer usually announces
//! itself.
//!

use std::alloc::{alloc, dealloc, Layout};
use std::time::Duration;

use senna_std_core::{senna_bytes_new, HeapHeader, HeapTag, SennaBytes};

use crate::block::{BlockHandle, BlockRef, OwnedBlock};
use crate::capsule::MailboxCapsule;
use crate::condvar::CondVar;
use crate::deadline::Deadline;
use crate::error::SyncError;
use crate::mutex::Mutex;
use crate::{throw_sync_error, SYNC_OK};

/// Sentinel written at offset zero of every live mailbox state block.
pub const MAILBOX_MAGIC: u64 = u64::from_be_bytes(*b"SNMAILBX");

/// Native state record shared by every wrapper of one mailbox.
///
/// `count` is 0 or 1. A zero-length message is stored as a null `buffer`
/// with `count == 1`, which keeps it distinguishable from "empty".
#[repr(C)]
pub struct MailboxState {
    pub magic: u64,
    pub buffer: *mut u8,
    pub buffer_len: usize,
    pub open: u32,
    pub count: u32,
}

/// A single-slot mailbox backed by explicitly managed native memory.
pub struct Mailbox {
    state: BlockHandle<MailboxState>,
    mutex: Mutex,
    condvar: CondVar,
}

unsafe impl Send for Mailbox {}
unsafe impl Sync for Mailbox {}

impl Mailbox {
    /// Allocate the state block and its guarding mutex and condvar. The new
    /// mailbox is open and empty.
    pub fn new() -> Self {
        let state = OwnedBlock::<MailboxState>::zeroed();
        unsafe {
            (*state.as_ptr()).magic = MAILBOX_MAGIC;
            (*state.as_ptr()).open = 1;
        }
        tracing::trace!(addr = state.addr(), "mailbox created");
        Self {
            state: BlockHandle::Owned(state),
            mutex: Mutex::new(),
            condvar: CondVar::new(),
        }
    }

    /// Checked access to the state block. Callers must hold `self.mutex`.
    fn state(&self) -> *mut MailboxState {
        let s = self.state.as_ptr();
        let magic = unsafe { (*s).magic };
        assert!(
            magic == MAILBOX_MAGIC,
            "mailbox state corrupted (magic {magic:#x} at {:#x})",
            s as usize
        );
        s
    }

    /// Deposit `payload` into the slot. Fails with [`SyncError::Full`] if a
    /// message is already pending and [`SyncError::Closed`] after close.
    /// Never blocks beyond the internal lock.
    pub fn put(&self, payload: &[u8]) -> Result<(), SyncError> {
        let guard = self.mutex.lock();
        let s = self.state();
        unsafe {
            if (*s).open == 0 {
                return Err(SyncError::Closed);
            }
            if (*s).count != 0 {
                return Err(SyncError::Full);
            }
            if !payload.is_empty() {
                let layout = Layout::array::<u8>(payload.len()).unwrap();
                let buf = alloc(layout);
                if buf.is_null() {
                    panic!("Failed to allocate mailbox payload ({} bytes)", payload.len());
                }
                std::ptr::copy_nonoverlapping(payload.as_ptr(), buf, payload.len());
                (*s).buffer = buf;
                (*s).buffer_len = payload.len();
            }
            (*s).count = 1;
        }
        tracing::trace!(len = payload.len(), "mailbox put");
        // One message can satisfy one taker.
        self.condvar.notify_one();
        drop(guard);
        Ok(())
    }

    /// Remove and return the pending message, blocking until one arrives.
    ///
    /// With `timeout` of `None` the wait is unbounded. A pending message is
    /// drained even if the mailbox has closed; [`SyncError::Closed`] is
    /// returned only when the mailbox is closed *and* empty, and
    /// [`SyncError::Timeout`] when the budget runs out while it is open and
    /// empty.
    pub fn take(&self, timeout: Option<Duration>) -> Result<Vec<u8>, SyncError> {
        let deadline = timeout.map(Deadline::new);
        let mut guard = self.mutex.lock();
        loop {
            let s = self.state();
            unsafe {
                if (*s).count == 1 {
                    let payload = drain(s);
                    tracing::trace!(len = payload.len(), "mailbox take");
                    drop(guard);
                    return Ok(payload);
                }
                if (*s).open == 0 {
                    return Err(SyncError::Closed);
                }
            }
            match &deadline {
                None => self.condvar.wait(&mut guard),
                Some(deadline) => {
                    let remaining = deadline.remaining();
                    if remaining.is_zero() {
                        return Err(SyncError::Timeout);
                    }
                    // A wait timeout only ends this iteration; whether the
                    // operation has timed out is decided by the deadline at
                    // the top of the loop, after a final predicate check.
                    let _ = self.condvar.wait_timeout(&mut guard, remaining);
                }
            }
        }
    }

    /// Close the mailbox. Idempotent; a pending message stays drainable.
    pub fn close(&self) {
        let guard = self.mutex.lock();
        let s = self.state();
        unsafe {
            if (*s).open == 0 {
                return;
            }
            (*s).open = 0;
        }
        tracing::debug!(addr = self.state.addr(), "mailbox closed");
        // Every blocked taker must observe the close, not just one.
        self.condvar.notify_all();
        drop(guard);
    }

    pub fn is_open(&self) -> bool {
        self.mutex.run_exclusive(|| unsafe { (*self.state()).open == 1 })
    }

    pub fn is_empty(&self) -> bool {
        self.mutex.run_exclusive(|| unsafe { (*self.state()).count == 0 })
    }

    pub fn is_full(&self) -> bool {
        !self.is_empty()
    }

    /// Length in bytes of the pending message, or `None` when empty.
    pub fn pending_len(&self) -> Option<usize> {
        self.mutex.run_exclusive(|| unsafe {
            let s = self.state();
            if (*s).count == 0 {
                None
            } else {
                Some((*s).buffer_len)
            }
        })
    }

    /// Package this mailbox for transfer to another task.
    pub fn to_capsule(&self) -> MailboxCapsule {
        MailboxCapsule {
            state: self.state.addr() as u64,
            mutex: self.mutex.to_capsule(),
            condvar: self.condvar.to_capsule(),
        }
    }

    /// Rebuild a wrapper from a transferred capsule. The new wrapper borrows
    /// all three native blocks and never frees them.
    ///
    /// The caller must guarantee the creating task's wrapper is still alive.
    pub unsafe fn from_capsule(capsule: MailboxCapsule) -> Self {
        let state = unsafe { BlockRef::from_addr(capsule.state as usize) };
        tracing::trace!(addr = capsule.state, "mailbox materialized from capsule");
        Self {
            state: BlockHandle::Borrowed(state),
            mutex: unsafe { Mutex::from_capsule(capsule.mutex) },
            condvar: unsafe { CondVar::from_capsule(capsule.condvar) },
        }
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        if !self.state.is_owned() {
            return;
        }
        let s = self.state();
        unsafe {
            if !(*s).buffer.is_null() {
                dealloc((*s).buffer, Layout::array::<u8>((*s).buffer_len).unwrap());
            }
            // Scrub the sentinel so a stale capsule materialized after this
            // point trips the corruption check instead of reading freed state.
            (*s).magic = 0;
        }
        tracing::trace!(addr = self.state.addr(), "mailbox freed");
        // The state block, mutex, and condvar release in the field drops.
    }
}

/// Copy the pending payload out and reset the slot. Lock must be held and
/// `count` must be 1.
unsafe fn drain(s: *mut MailboxState) -> Vec<u8> {
    unsafe {
        let payload = if (*s).buffer.is_null() {
            Vec::new()
        } else {
            let len = (*s).buffer_len;
            let copy = std::slice::from_raw_parts((*s).buffer, len).to_vec();
            dealloc((*s).buffer, Layout::array::<u8>(len).unwrap());
            copy
        };
        (*s).buffer = std::ptr::null_mut();
        (*s).buffer_len = 0;
        (*s).count = 0;
        payload
    }
}

/// Language-visible mailbox object.
#[repr(C)]
pub struct SennaMailbox {
    pub header: HeapHeader,
    inner: Mailbox,
}

fn alloc_mailbox(inner: Mailbox) -> *mut SennaMailbox {
    unsafe {
        let layout = Layout::new::<SennaMailbox>();
        let ptr = alloc(layout) as *mut SennaMailbox;
        if ptr.is_null() {
            panic!("Failed to allocate mailbox");
        }
        std::ptr::write(
            ptr,
            SennaMailbox {
                header: HeapHeader::new(HeapTag::Mailbox),
                inner,
            },
        );
        ptr
    }
}

/// Create a new open, empty mailbox with refcount 1.
#[unsafe(no_mangle)]
pub extern "C" fn senna_mailbox_new() -> *mut SennaMailbox {
    alloc_mailbox(Mailbox::new())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mailbox_incref(mb: *mut SennaMailbox) {
    if !mb.is_null() {
        unsafe { (*mb).header.incref() };
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mailbox_decref(mb: *mut SennaMailbox) {
    if mb.is_null() {
        return;
    }
    unsafe {
        if (*mb).header.decref() {
            std::ptr::drop_in_place(mb);
            dealloc(mb as *mut u8, Layout::new::<SennaMailbox>());
        }
    }
}

/// Deposit a message. Returns a status code; on failure a typed exception is
/// also set. A null `data` with nonzero `len` is treated as empty.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mailbox_put(
    mb: *mut SennaMailbox,
    data: *const u8,
    len: usize,
) -> i64 {
    if mb.is_null() {
        return SYNC_OK;
    }
    let payload = if data.is_null() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data, len) }
    };
    match unsafe { &(*mb).inner }.put(payload) {
        Ok(()) => SYNC_OK,
        Err(err) => {
            throw_sync_error(err);
            err.status_code()
        }
    }
}

/// Remove and return the pending message as a fresh `SennaBytes`, blocking
/// until one arrives. Negative `timeout_ms` means wait forever. Returns null
/// with a typed exception set on timeout or on a closed, empty mailbox.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mailbox_take(mb: *mut SennaMailbox, timeout_ms: i64) -> *mut SennaBytes {
    if mb.is_null() {
        return std::ptr::null_mut();
    }
    let timeout = if timeout_ms < 0 {
        None
    } else {
        Some(Duration::from_millis(timeout_ms as u64))
    };
    match unsafe { &(*mb).inner }.take(timeout) {
        Ok(payload) => unsafe { senna_bytes_new(payload.as_ptr(), payload.len()) },
        Err(err) => {
            throw_sync_error(err);
            std::ptr::null_mut()
        }
    }
}

/// Close the mailbox. Idempotent.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mailbox_close(mb: *mut SennaMailbox) {
    if !mb.is_null() {
        unsafe { (*mb).inner.close() };
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mailbox_is_open(mb: *mut SennaMailbox) -> i64 {
    if mb.is_null() {
        return 0;
    }
    unsafe { (*mb).inner.is_open() as i64 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mailbox_is_closed(mb: *mut SennaMailbox) -> i64 {
    if mb.is_null() {
        return 1;
    }
    unsafe { !(*mb).inner.is_open() as i64 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mailbox_is_empty(mb: *mut SennaMailbox) -> i64 {
    if mb.is_null() {
        return 1;
    }
    unsafe { (*mb).inner.is_empty() as i64 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mailbox_is_full(mb: *mut SennaMailbox) -> i64 {
    if mb.is_null() {
        return 0;
    }
    unsafe { (*mb).inner.is_full() as i64 }
}

/// Length of the pending message in bytes, -1 when empty.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mailbox_len(mb: *mut SennaMailbox) -> i64 {
    if mb.is_null() {
        return -1;
    }
    match unsafe { (*mb).inner.pending_len() } {
        Some(len) => len as i64,
        None => -1,
    }
}

/// Capsule for task transfer, written to `out` (three u64 fields).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mailbox_to_capsule(
    mb: *mut SennaMailbox,
    out: *mut MailboxCapsule,
) {
    if mb.is_null() || out.is_null() {
        return;
    }
    unsafe { *out = (*mb).inner.to_capsule() };
}

/// Rebuild a mailbox object from a capsule received from another task.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_mailbox_from_capsule(capsule: *const MailboxCapsule) -> *mut SennaMailbox {
    if capsule.is_null() {
        return std::ptr::null_mut();
    }
    alloc_mailbox(unsafe { Mailbox::from_capsule(*capsule) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_new_mailbox_is_open_and_empty() {
        let mb = Mailbox::new();
        assert!(mb.is_open());
        assert!(mb.is_empty());
        assert!(!mb.is_full());
        assert_eq!(mb.pending_len(), None);
    }

    #[test]
    fn test_put_then_take_round_trip() {
        let mb = Mailbox::new();
        mb.put(&[1, 2, 3]).unwrap();
        assert!(mb.is_full());
        assert_eq!(mb.pending_len(), Some(3));
        assert_eq!(mb.take(None).unwrap(), vec![1, 2, 3]);
        assert!(mb.is_empty());
    }

    #[test]
    fn test_put_into_full_mailbox_fails() {
        let mb = Mailbox::new();
        mb.put(b"first").unwrap();
        assert_eq!(mb.put(b"second"), Err(SyncError::Full));
        // The pending message is untouched by the failed put.
        assert_eq!(mb.take(None).unwrap(), b"first");
    }

    #[test]
    fn test_put_after_close_fails() {
        let mb = Mailbox::new();
        mb.close();
        assert_eq!(mb.put(b"late"), Err(SyncError::Closed));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mb = Mailbox::new();
        mb.close();
        mb.close();
        assert!(!mb.is_open());
    }

    #[test]
    fn test_pending_message_survives_close() {
        let mb = Mailbox::new();
        mb.put(b"parting gift").unwrap();
        mb.close();
        assert!(mb.is_full());
        assert_eq!(mb.take(None).unwrap(), b"parting gift");
        // Now closed and empty: takers are rejected.
        assert_eq!(
            mb.take(Some(Duration::from_millis(50))),
            Err(SyncError::Closed)
        );
    }

    #[test]
    fn test_take_times_out_on_empty_open_mailbox() {
        let mb = Mailbox::new();
        let start = Instant::now();
        let result = mb.take(Some(Duration::from_millis(50)));
        assert_eq!(result, Err(SyncError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_zero_length_message_is_a_real_message() {
        let mb = Mailbox::new();
        mb.put(&[]).unwrap();
        assert!(mb.is_full());
        assert_eq!(mb.pending_len(), Some(0));
        assert_eq!(mb.take(None).unwrap(), Vec::<u8>::new());
        assert!(mb.is_empty());
    }

    #[test]
    fn test_large_payload_round_trip() {
        let mb = Mailbox::new();
        let payload: Vec<u8> = (0..1_048_576).map(|i| (i % 251) as u8).collect();
        mb.put(&payload).unwrap();
        assert_eq!(mb.take(None).unwrap(), payload);
    }

    #[test]
    fn test_blocked_take_woken_by_put() {
        let mb = Mailbox::new();
        thread::scope(|s| {
            let taker = s.spawn(|| mb.take(Some(Duration::from_secs(10))));
            thread::sleep(Duration::from_millis(50));
            mb.put(b"wake up").unwrap();
            assert_eq!(taker.join().unwrap().unwrap(), b"wake up");
        });
    }

    #[test]
    fn test_blocked_take_woken_by_close() {
        let mb = Mailbox::new();
        thread::scope(|s| {
            let taker = s.spawn(|| {
                let start = Instant::now();
                let result = mb.take(Some(Duration::from_secs(10)));
                (result, start.elapsed())
            });
            thread::sleep(Duration::from_millis(50));
            mb.close();
            let (result, elapsed) = taker.join().unwrap();
            assert_eq!(result, Err(SyncError::Closed));
            // Woken by the close broadcast, not by the timeout.
            assert!(elapsed < Duration::from_secs(5));
        });
    }

    #[test]
    fn test_one_message_satisfies_exactly_one_taker() {
        let mb = Mailbox::new();
        thread::scope(|s| {
            let a = s.spawn(|| mb.take(Some(Duration::from_millis(400))));
            let b = s.spawn(|| mb.take(Some(Duration::from_millis(400))));
            thread::sleep(Duration::from_millis(50));
            mb.put(b"only one").unwrap();

            let results = [a.join().unwrap(), b.join().unwrap()];
            let won = results
                .iter()
                .filter(|r| r.as_deref() == Ok(b"only one".as_slice()))
                .count();
            let timed_out = results
                .iter()
                .filter(|r| **r == Err(SyncError::Timeout))
                .count();
            assert_eq!(won, 1);
            assert_eq!(timed_out, 1);
        });
    }

    #[test]
    fn test_capsule_transfer_between_threads() {
        let mb = Mailbox::new();
        let capsule = mb.to_capsule();
        thread::scope(|s| {
            s.spawn(move || {
                let view = unsafe { Mailbox::from_capsule(capsule) };
                view.put(b"from the other side").unwrap();
            });
            assert_eq!(
                mb.take(Some(Duration::from_secs(10))).unwrap(),
                b"from the other side"
            );
        });
        assert!(mb.is_open());
    }

    #[test]
    fn test_corrupted_magic_is_detected() {
        let mb = Mailbox::new();
        let capsule = mb.to_capsule();
        let state = capsule.state as *mut MailboxState;

        unsafe { (*state).magic = 0xdead_beef };
        let view = unsafe { Mailbox::from_capsule(capsule) };
        let result = catch_unwind(AssertUnwindSafe(|| view.is_open()));
        assert!(result.is_err());
        drop(view);

        // Restore the sentinel so the owner can tear down normally.
        unsafe { (*state).magic = MAILBOX_MAGIC };
        assert!(mb.is_open());
    }

    #[test]
    fn test_ffi_put_take_and_exceptions() {
        use senna_std_core::{
            senna_bytes_decref, senna_exception_clear, senna_exception_is_type,
            EXCEPTION_TYPE_MAILBOX_CLOSED, EXCEPTION_TYPE_TIMEOUT_ERROR,
        };

        unsafe {
            let mb = senna_mailbox_new();
            assert_eq!(senna_mailbox_is_open(mb), 1);

            // Timeout on an empty mailbox throws a typed timeout exception.
            let b = senna_mailbox_take(mb, 40);
            assert!(b.is_null());
            assert_eq!(senna_exception_is_type(EXCEPTION_TYPE_TIMEOUT_ERROR), 1);
            senna_exception_clear();

            assert_eq!(senna_mailbox_put(mb, b"hello".as_ptr(), 5), SYNC_OK);
            assert_eq!(senna_mailbox_len(mb), 5);
            assert_eq!(senna_mailbox_is_full(mb), 1);
            assert_eq!(senna_mailbox_is_closed(mb), 0);
            let b = senna_mailbox_take(mb, -1);
            assert!(!b.is_null());
            assert_eq!((*b).as_slice(), b"hello");
            senna_bytes_decref(b);

            senna_mailbox_close(mb);
            let b = senna_mailbox_take(mb, 40);
            assert!(b.is_null());
            assert_eq!(senna_exception_is_type(EXCEPTION_TYPE_MAILBOX_CLOSED), 1);
            senna_exception_clear();

            senna_mailbox_decref(mb);
        }
    }

    #[test]
    fn test_ffi_capsule_transfer_between_threads() {
        use senna_std_core::senna_bytes_decref;

        unsafe {
            let mb = senna_mailbox_new();
            let mut capsule = MailboxCapsule {
                state: 0,
                mutex: crate::capsule::MutexCapsule { addr: 0 },
                condvar: crate::capsule::CondVarCapsule { addr: 0 },
            };
            senna_mailbox_to_capsule(mb, &mut capsule);
            assert_ne!(capsule.state, 0);

            let producer = thread::spawn(move || unsafe {
                let view = senna_mailbox_from_capsule(&capsule);
                let status = senna_mailbox_put(view, b"ping".as_ptr(), 4);
                senna_mailbox_decref(view);
                status
            });

            let b = senna_mailbox_take(mb, 10_000);
            assert!(!b.is_null());
            assert_eq!((*b).as_slice(), b"ping");
            senna_bytes_decref(b);
            assert_eq!(producer.join().unwrap(), SYNC_OK);

            senna_mailbox_decref(mb);
        }
    }
}
