//!
//! Runtime Value Representation
//!
//! senna values at runtime are 64-bit values: inline primitives (int, float,
//! bool) stored directly, or pointers to reference-counted heap objects.
//! Every heap object starts with a `HeapHeader` so generated code can incref
//! and decref without knowing the concrete type.
//!

use std::alloc::{alloc, dealloc, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Type tags for heap objects
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapTag {
    String = 0,
    Bytes = 1,
    Mutex = 2,
    CondVar = 3,
    Mailbox = 4,
}

/// Header for all heap-allocated objects
#[repr(C)]
pub struct HeapHeader {
    pub refcount: AtomicUsize,
    pub tag: HeapTag,
    pub _pad: [u8; 7],
}

impl HeapHeader {
    pub fn new(tag: HeapTag) -> Self {
        Self {
            refcount: AtomicUsize::new(1),
            tag,
            _pad: [0; 7],
        }
    }

    pub fn incref(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decref(&self) -> bool {
        if self.refcount.fetch_sub(1, Ordering::Release) == 1 {
            std::sync::atomic::fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Relaxed)
    }
}

/// A heap-allocated string
#[repr(C)]
pub struct SennaString {
    pub header: HeapHeader,
    pub len: usize,
    pub data: [u8; 0],
}

impl SennaString {
    pub fn as_str(&self) -> &str {
        unsafe {
            let slice = std::slice::from_raw_parts(self.data.as_ptr(), self.len);
            std::str::from_utf8_unchecked(slice)
        }
    }
}

/// Allocate a new string on the heap
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_string_new(data: *const u8, len: usize) -> *mut SennaString {
    unsafe {
        let layout = Layout::from_size_align(
            std::mem::size_of::<SennaString>() + len,
            std::mem::align_of::<SennaString>(),
        ).unwrap();

        let ptr = alloc(layout) as *mut SennaString;
        if ptr.is_null() {
            panic!("Failed to allocate string");
        }

        (*ptr).header = HeapHeader::new(HeapTag::String);
        (*ptr).len = len;

        if !data.is_null() && len > 0 {
            std::ptr::copy_nonoverlapping(data, (*ptr).data.as_mut_ptr(), len);
        }

        ptr
    }
}

/// Increment reference count of a string
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_string_incref(s: *mut SennaString) {
    if !s.is_null() {
        unsafe { (*s).header.incref(); }
    }
}

/// Decrement reference count and free if zero
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_string_decref(s: *mut SennaString) {
    if !s.is_null() {
        unsafe {
            if (*s).header.decref() {
                let len = (*s).len;
                let layout = Layout::from_size_align(
                    std::mem::size_of::<SennaString>() + len,
                    std::mem::align_of::<SennaString>(),
                ).unwrap();
                dealloc(s as *mut u8, layout);
            }
        }
    }
}

/// Get string length in bytes
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_string_len(s: *const SennaString) -> i64 {
    if s.is_null() {
        0
    } else {
        unsafe { (*s).len as i64 }
    }
}

/// Get pointer to string data (for printing)
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_string_data(s: *const SennaString) -> *const u8 {
    if s.is_null() {
        std::ptr::null()
    } else {
        unsafe { (*s).data.as_ptr() }
    }
}
