//! # Offline Kit Common
//!
//! Shared plumbing for the Offline Kit crates. Right now this is the
//! tracing subscriber setup used by every binary and integration test.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
