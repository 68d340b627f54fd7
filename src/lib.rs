//! overwire: a readiness-driven TCP message server.
//!
//! Many client connections are multiplexed over a small pool of worker
//! threads using readiness-based I/O (mio). Each connection accumulates
//! percent-encoded fragments until the decoded text contains the in-band
//! terminator `"over"`, then receives a single percent-encoded response
//! and is actively closed. One logical request per connection.
//!
//! The library surface exists for embedding and tests: [`runtime::spawn`]
//! starts a server with an injected [`handler::Responder`] and
//! [`handler::Hooks`]; [`runtime::run`] uses the defaults the binary uses.

pub mod client;
pub mod codec;
pub mod config;
pub mod handler;
pub mod runtime;
