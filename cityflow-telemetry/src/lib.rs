//! Tracing initialization for cityflow binaries and tests.

pub mod tracing;
