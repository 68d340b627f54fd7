//! Readiness-driven server runtime.
//!
//! One worker thread per listener: each owns a mio `Poll`, a slab-backed
//! connection registry, and the reassembly buffers of its connections.
//! Shared abstractions:
//! - `MessageBuffer`: per-connection partial-message reassembly
//! - `Connection` / `ConnectionRegistry`: per-connection state and ownership

pub mod buffer;
pub mod connection;
mod event_loop;

pub use event_loop::{run, spawn, ServerHandle};
