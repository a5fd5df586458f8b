//! Shared utilities.
//!
//! Content hashing and filesystem tree helpers used by the store and the
//! execution engine.

pub mod fs;
pub mod hash;
