//! Observability for the daemon
//!
//! Structured logging only: the core reports facts as `tracing` events and
//! this module decides where and how they are written.

pub mod logging;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat, LogSink};

// Span macros for structured logging
pub use logging::{lifecycle_span, session_span};
