//! Application seams: response production and lifecycle observation.
//!
//! Both traits are injected into the event loop at construction. Workers
//! share one instance of each, so implementations must be `Send + Sync`;
//! the server core never initializes logging or dictates a log format.

use std::io;
use std::net::SocketAddr;
use tracing::{debug, error, info};

/// Produces the reply for a completed message.
pub trait Responder: Send + Sync {
    fn respond(&self, message: &str) -> String;
}

/// Reply sent by [`AckResponder`] regardless of request content.
pub const DEFAULT_ACK: &str = "request processed";

/// Fixed-acknowledgment responder used by the binary.
pub struct AckResponder;

impl Responder for AckResponder {
    fn respond(&self, _message: &str) -> String {
        DEFAULT_ACK.to_string()
    }
}

/// Echoes the completed message back, prefixed for recognizability.
pub struct EchoResponder;

impl Responder for EchoResponder {
    fn respond(&self, message: &str) -> String {
        format!("echo: {message}")
    }
}

/// Observation points for connection lifecycle events.
///
/// Default methods are no-ops, so implementations only override what they
/// observe.
pub trait Hooks: Send + Sync {
    /// A fragment arrived but the message is not yet complete. `pending` is
    /// the lossily decoded content accumulated so far.
    fn on_fragment(&self, peer: SocketAddr, pending: &str) {
        let _ = (peer, pending);
    }

    /// A message completed and is about to be answered.
    fn on_message(&self, peer: SocketAddr, message: &str) {
        let _ = (peer, message);
    }

    /// The connection failed or was reaped; it is closed after this call.
    fn on_error(&self, peer: SocketAddr, error: &io::Error) {
        let _ = (peer, error);
    }
}

/// Hooks that log through `tracing`, used by the binary.
pub struct LogHooks;

impl Hooks for LogHooks {
    fn on_fragment(&self, peer: SocketAddr, pending: &str) {
        debug!(%peer, pending, "message incomplete, waiting for more fragments");
    }

    fn on_message(&self, peer: SocketAddr, message: &str) {
        info!(%peer, message, "message completed");
    }

    fn on_error(&self, peer: SocketAddr, error: &io::Error) {
        error!(%peer, %error, "connection error");
    }
}

/// Hooks that observe nothing.
pub struct NoopHooks;

impl Hooks for NoopHooks {}
