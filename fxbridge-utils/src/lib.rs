//! fxbridge-utils: Common utilities shared across fxbridge crates
//!
//! Provides the unified error type and the tracing-based logging setup.

pub mod error;
pub mod logging;

pub use error::{BridgeError, Result};
pub use logging::{init_logging, init_logging_with_filter};
