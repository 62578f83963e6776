//! Testing utilities and mock implementations
//!
//! This module provides a scripted broker link and a recording sink so the
//! session lifecycle can be exercised without a running MQTT broker.

pub mod mocks;

pub use mocks::*;
