//! Stowage Core
//!
//! Shared collections, logging setup and profiling hooks used by the
//! bundle cache and its tooling.

pub mod alloc;
pub mod logging;
pub mod profiling;
