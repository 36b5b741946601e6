//! TLS wire-level constants and name tables shared across the crate.

pub mod constants;

pub use constants::*;
