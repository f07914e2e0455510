//!
//! SennaBytes - Core Bytes Type
//!
//! Provides the heap-allocated byte array type shared across the runtime
//! crates. Similar to strings but for raw binary data. Mailbox `take`
//! returns its payload as a `SennaBytes` so the receiving task owns an
//! independent copy on its own heap.
//!

use std::alloc::{alloc, dealloc, Layout};

use crate::{HeapHeader, HeapTag};

/// A heap-allocated byte array
#[repr(C)]
pub struct SennaBytes {
    pub header: HeapHeader,
    pub len: usize,
    pub data: [u8; 0],
}

impl SennaBytes {
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }
}

fn bytes_layout(len: usize) -> Layout {
    Layout::from_size_align(
        std::mem::size_of::<SennaBytes>() + len,
        std::mem::align_of::<SennaBytes>(),
    ).unwrap()
}

/// Allocate a new byte array on the heap, copying `data` if non-null
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_bytes_new(data: *const u8, len: usize) -> *mut SennaBytes {
    unsafe {
        let ptr = alloc(bytes_layout(len)) as *mut SennaBytes;
        if ptr.is_null() {
            panic!("Failed to allocate bytes");
        }

        (*ptr).header = HeapHeader::new(HeapTag::Bytes);
        (*ptr).len = len;

        if !data.is_null() && len > 0 {
            std::ptr::copy_nonoverlapping(data, (*ptr).data.as_mut_ptr(), len);
        }

        ptr
    }
}

/// Increment reference count
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_bytes_incref(b: *mut SennaBytes) {
    if !b.is_null() {
        unsafe { (*b).header.incref(); }
    }
}

/// Decrement reference count and free if zero
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_bytes_decref(b: *mut SennaBytes) {
    if !b.is_null() {
        unsafe {
            if (*b).header.decref() {
                let len = (*b).len;
                dealloc(b as *mut u8, bytes_layout(len));
            }
        }
    }
}

/// Get byte array length
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_bytes_len(b: *const SennaBytes) -> i64 {
    if b.is_null() {
        0
    } else {
        unsafe { (*b).len as i64 }
    }
}

/// Get pointer to byte data
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_bytes_data(b: *const SennaBytes) -> *const u8 {
    if b.is_null() {
        std::ptr::null()
    } else {
        unsafe { (*b).data.as_ptr() }
    }
}

/// Get byte at index (returns 0 if out of bounds)
#[unsafe(no_mangle)]
pub unsafe extern "C" fn senna_bytes_get(b: *const SennaBytes, index: i64) -> i64 {
    if b.is_null() {
        return 0;
    }

    unsafe {
        let idx = index as usize;
        if idx >= (*b).len {
            return 0;
        }
        *(*b).data.as_ptr().add(idx) as i64
    }
}
