//! Observability for the multiplexer
//!
//! Structured logging and the span macros used around broker operations and
//! handler dispatch.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{dispatch_span, mqtt_span};
