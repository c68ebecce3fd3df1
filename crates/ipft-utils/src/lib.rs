//! # ipft Utilities
//!
//! Shared helpers for the ipft workspace, currently the `tracing` based
//! logging setup used by the CLI.

pub mod logging;

// Re-export commonly used logging items for convenience
pub use logging::{init_logging, LogFormat, LogLevel, LoggingError, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};
