//! Tool-command capability interface.
//!
//! `mcp` control messages are forwarded verbatim to this collaborator;
//! the engine only relays its reply (if any) back to the server.

/// External tool/JSON-RPC command table.
pub trait ToolDispatcher: Send + Sync {
    /// Evaluate one forwarded `mcp` message. A `Some` return is sent
    /// back to the server as a `jsonMessage`.
    fn eval(&self, message: &serde_json::Value) -> Option<String>;
}
