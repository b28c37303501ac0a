//! Transport capability interface.
//!
//! The socket itself (TCP, WebSocket, whatever the product ships) is
//! an external collaborator. This crate only requires that it moves
//! whole byte slices reliably and in order, reports its connection
//! state truthfully, and delivers inbound bytes and lifecycle changes
//! to the bound [`TransportSink`] — the sink's methods are invoked
//! from the transport's own receive context, the engine's "network
//! thread".

use std::sync::Arc;

use crate::error::Result;

/// Receives transport lifecycle and data callbacks.
pub trait TransportSink: Send + Sync {
    fn on_connected(&self);
    fn on_disconnected(&self);
    fn on_bytes(&self, bytes: &[u8]);
}

/// One logical connection to the assistant server.
pub trait Transport: Send + Sync {
    /// Register the sink before the first `connect`.
    fn bind(&self, sink: Arc<dyn TransportSink>);

    fn connect(&self) -> Result<()>;

    /// Tear down and re-establish the connection. Also the escape
    /// hatch when the stream is poisoned: a protocol violation cannot
    /// be recovered in place.
    fn reconnect(&self);

    /// Returns `false` when the bytes were not handed to the socket.
    fn send(&self, bytes: &[u8]) -> bool;

    fn is_connected(&self) -> bool;
}
