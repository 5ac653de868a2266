//! Concurrency utilities for coordinating transfer runs.
//!
//! The [`shutdown`] module implements the broadcast channel the interrupt
//! latch fires so suspended tasks wake promptly. The [`stream`] module
//! integrates that signal into discovery row streams, letting the splitter
//! observe an interrupt even while blocked on a row fetch.

pub mod shutdown;
pub mod stream;
