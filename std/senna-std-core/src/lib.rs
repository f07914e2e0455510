//!
//! senna-std-core - Core Runtime Types
//!
//! This crate provides the fundamental types shared across the senna runtime
//! crates:
//!
//! - `HeapHeader` and `HeapTag` for reference-counted heap objects
//! - `SennaString` for heap-allocated strings with UTF-8 support
//! - `SennaBytes` for heap-allocated byte arrays
//! - Exception handling primitives for try/catch support
//!
//! All heap objects use atomic reference counting for thread safety. The
//! compiler emits incref/decref pairs around value lifetimes; a decref that
//! reaches zero is the finalization hook that releases any native resources
//! the object owns.
//!

pub mod value;
pub mod bytes;
pub mod exception;

pub use value::*;
pub use bytes::*;
pub use exception::*;
