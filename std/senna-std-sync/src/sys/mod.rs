//!
//! Platform backends
//!
//! Raw mutex and condition variable operations over caller-provided native
//! blocks. The backend is picked once at compile time; everything above this
//! module sees a single set of functions and never learns which variant it
//! holds. Backends differ in capability: Linux has a native timed mutex
//! acquire, macOS and Windows do not and rely on the poll emulation in
//! `deadline.rs`.
//!
//! Any OS error other than a timeout is a fatal condition: these functions
//! panic with the raw error code rather than returning it.
//!

#[cfg(unix)]
mod posix;
#[cfg(unix)]
pub use posix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::*;
