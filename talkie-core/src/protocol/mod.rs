//! Wire codec: framing, compression, and message schema.
//!
//! ## Layers (outermost first)
//!
//! ```text
//! [4-byte big-endian length][zlib-compressed payload]   — framing.rs
//!         payload = MessagePack Envelope                — envelope.rs
//!                 Envelope.serialized_data = MessagePack body
//!                         Msg bodies carry JSON control — control.rs
//! ```
//!
//! The protocol is fixed by the server; this crate reproduces it at
//! the framing/compression/encoding level and nothing more.

pub mod control;
pub mod envelope;
pub mod framing;

pub use envelope::{Envelope, Payload};
pub use framing::FrameAssembler;
