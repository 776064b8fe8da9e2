//! Testing utilities and mock implementations
//!
//! This module provides mock sessions, connectors and executors for testing the
//! multiplexer without an MQTT broker.

pub mod mocks;

pub use mocks::*;
