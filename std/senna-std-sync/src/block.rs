//!
//! Native memory blocks
//!
//! A native block is a fixed-size, explicitly allocated region outside the
//! garbage-collected heap. Each block backs exactly one OS synchronization
//! object or one mailbox state record.
//!
//! Ownership is expressed in the types: `OwnedBlock` frees its memory exactly
//! once when dropped, `BlockRef` is a copyable address that never frees. A
//! wrapper materialized from a capsule in another task holds a `BlockRef`;
//! only the creating task's wrapper holds the `OwnedBlock`, so the block is
//! released by the creator's finalizer and by nothing else.
//!

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::marker::PhantomData;
use std::ptr::NonNull;

/// An owning handle to one zero-initialized native block.
#[derive(Debug)]
pub struct OwnedBlock<T> {
    ptr: NonNull<T>,
}

impl<T> OwnedBlock<T> {
    /// Allocate a zeroed block sized and aligned for `T`.
    pub fn zeroed() -> Self {
        let layout = Layout::new::<T>();
        assert!(layout.size() > 0, "native block must have a size");
        let ptr = unsafe { alloc_zeroed(layout) } as *mut T;
        let Some(ptr) = NonNull::new(ptr) else {
            panic!("Failed to allocate native block ({} bytes)", layout.size());
        };
        Self { ptr }
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Stable address identifying this block across tasks.
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

impl<T> Drop for OwnedBlock<T> {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.ptr.as_ptr() as *mut u8, Layout::new::<T>());
        }
    }
}

/// A non-owning reference to a native block owned elsewhere.
#[derive(Debug)]
pub struct BlockRef<T> {
    ptr: NonNull<T>,
    _marker: PhantomData<*mut T>,
}

impl<T> Clone for BlockRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BlockRef<T> {}

impl<T> BlockRef<T> {
    /// Rebuild a reference from an address carried in a capsule.
    ///
    /// The caller must guarantee the address came from a live block's
    /// `addr()` and that the owning wrapper outlives this reference.
    pub unsafe fn from_addr(addr: usize) -> Self {
        let Some(ptr) = NonNull::new(addr as *mut T) else {
            panic!("null native block address in capsule");
        };
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

/// The handle a managed wrapper keeps to its native block: either the owner
/// (constructed by `new`) or a borrower (constructed by `materialize`).
#[derive(Debug)]
pub enum BlockHandle<T> {
    Owned(OwnedBlock<T>),
    Borrowed(BlockRef<T>),
}

impl<T> BlockHandle<T> {
    pub fn as_ptr(&self) -> *mut T {
        match self {
            BlockHandle::Owned(block) => block.as_ptr(),
            BlockHandle::Borrowed(block) => block.as_ptr(),
        }
    }

    pub fn addr(&self) -> usize {
        match self {
            BlockHandle::Owned(block) => block.addr(),
            BlockHandle::Borrowed(block) => block.addr(),
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, BlockHandle::Owned(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_block_is_zeroed() {
        let block = OwnedBlock::<[u8; 64]>::zeroed();
        let bytes = unsafe { &*block.as_ptr() };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_block_ref_shares_the_same_memory() {
        let block = OwnedBlock::<u64>::zeroed();
        let r = unsafe { BlockRef::<u64>::from_addr(block.addr()) };
        unsafe {
            *block.as_ptr() = 42;
            assert_eq!(*r.as_ptr(), 42);
        }
        assert_eq!(r.addr(), block.addr());
    }

    #[test]
    fn test_handle_reports_ownership() {
        let block = OwnedBlock::<u64>::zeroed();
        let addr = block.addr();
        let owned = BlockHandle::Owned(block);
        assert!(owned.is_owned());
        let borrowed = BlockHandle::<u64>::Borrowed(unsafe { BlockRef::from_addr(addr) });
        assert!(!borrowed.is_owned());
        assert_eq!(owned.addr(), borrowed.addr());
    }

    #[test]
    #[should_panic(expected = "null native block address")]
    fn test_null_capsule_address_is_rejected() {
        let _ = unsafe { BlockRef::<u64>::from_addr(0) };
    }
}
