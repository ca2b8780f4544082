//! Shared utilities.

pub mod bootstrap;
pub mod hex;
pub mod retry;
