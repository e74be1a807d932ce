//! Shared utilities.
//!
//! Hashing, cancellation helpers, and filesystem helpers used across the crate.

pub mod cancel;
pub mod fs;
pub mod hash;
