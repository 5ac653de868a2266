//! Testing utilities for exercising the transfer engine without a live
//! store.
//!
//! The engine's seams (discovery, codec, resource factory, sink) are all
//! trait-shaped, so a complete run can execute against scripted in-memory
//! collaborators. The utilities here cover the common fixtures:
//!
//! - [`discovery`] provides [`ScriptedDiscovery`](discovery::ScriptedDiscovery),
//!   an in-memory discovery source with declarative scan rows, group
//!   topology, injectable errors, and per-row delays for cancellation tests.
//! - [`codec`] provides [`RecordingCodec`](codec::RecordingCodec), an item
//!   codec that records every processed item and emits scripted outgoing
//!   references, driving the cross-reference cache the way a real format
//!   layer would.
//! - [`sink`] provides [`MemorySink`](sink::MemorySink), a transfer sink
//!   that counts commits and rollbacks and can be scripted to fail either.
//! - [`resource`] provides [`UnitResourceFactory`](resource::UnitResourceFactory),
//!   a resource factory handing out unit resources for workers that do not
//!   touch a store.
//!
//! Every run built from these fixtures is fully deterministic except where a
//! test deliberately introduces concurrency, and no fixture requires network
//! access or external processes.

pub mod codec;
pub mod discovery;
pub mod resource;
pub mod sink;
