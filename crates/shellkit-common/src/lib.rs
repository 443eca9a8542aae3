//! # ShellKit Common
//!
//! Utilities shared by the ShellKit crates.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - Wall-clock abstraction so cache ages can be driven from tests

pub mod clock;
pub mod logging;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use logging::{init_logging, LogConfig, LogFormat};
