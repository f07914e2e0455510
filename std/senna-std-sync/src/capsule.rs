//!
//! Capsules - handle transfer across task boundaries
//!
//! senna tasks do not share a managed heap: a live wrapper object can never
//! be handed to another task. A capsule is the transferable form: a plain,
//! trivially-copyable value carrying the address of the wrapper's native
//! block(s). The task transport copies the capsule like any other value, and
//! the receiving task materializes it into a new wrapper over the *same*
//! native resources (`Mutex::from_capsule` and friends) - no native memory
//! is allocated on that path, and the new wrapper never frees.
//!
//! Validity: the creating task's wrapper must stay alive for as long as any
//! materialized copy may be used. Materializing after the owner was
//! finalized is a use-after-free; the mailbox's magic sentinel is a
//! best-effort detector for that mistake, not a prevention mechanism.
//!

/// Transferable reference to a mutex's native block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexCapsule {
    pub addr: u64,
}

/// Transferable reference to a condition variable's native block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CondVarCapsule {
    pub addr: u64,
}

/// Transferable reference to a mailbox: its state block plus the capsules of
/// the mutex and condition variable guarding it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxCapsule {
    pub state: u64,
    pub mutex: MutexCapsule,
    pub condvar: CondVarCapsule,
}
