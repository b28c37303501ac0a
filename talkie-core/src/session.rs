//! Session link: one logical connection's send/receive plumbing.
//!
//! Owns the frame assembler for the connection and the typed send
//! path. Policy decisions (what a message *means*) live in the engine;
//! this layer only moves envelopes.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::error;

use crate::error::Result;
use crate::protocol::envelope::{Envelope, Payload};
use crate::protocol::framing::{encode_frame, FrameAssembler};
use crate::transport::Transport;

pub struct SessionLink {
    transport: Arc<dyn Transport>,
    assembler: Mutex<FrameAssembler>,
    /// `server_time − local unix time`, from the latest envelope.
    time_offset_secs: AtomicI64,
}

impl SessionLink {
    pub fn new(transport: Arc<dyn Transport>, recv_capacity: usize) -> Self {
        Self {
            transport,
            assembler: Mutex::new(FrameAssembler::new(recv_capacity)),
            time_offset_secs: AtomicI64::new(0),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Frame and send one payload.
    ///
    /// A send while disconnected is a silent no-op — callers that need
    /// at-least-once delivery re-issue after reconnect themselves.
    /// Returns whether the bytes were handed to the transport.
    pub fn send(&self, payload: &Payload) -> bool {
        if !self.transport.is_connected() {
            return false;
        }
        let envelope = match Envelope::wrap(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(proto = payload.proto_name(), error = %e, "failed to wrap payload");
                return false;
            }
        };
        match encode_frame(&envelope) {
            Ok(frame) => self.transport.send(&frame),
            Err(e) => {
                error!(proto = payload.proto_name(), error = %e, "failed to encode frame");
                false
            }
        }
    }

    /// Periodic keepalive so the server's idle timeout never fires.
    pub fn ping(&self) {
        self.send(&Payload::Ping);
    }

    /// Feed received bytes through the assembler.
    ///
    /// Updates the server-time offset from every decoded envelope. A
    /// returned error means the stream is poisoned; the caller must
    /// force a reconnect.
    pub fn ingest(&self, bytes: &[u8]) -> Result<Vec<Envelope>> {
        let envelopes = self.assembler.lock().feed(bytes)?;
        if let Some(last) = envelopes.last() {
            self.time_offset_secs
                .store(last.server_time - now_unix_secs(), Ordering::Relaxed);
        }
        Ok(envelopes)
    }

    /// Drop partial-frame state. Call on every (re)connect — framing
    /// never survives a connection gap.
    pub fn reset(&self) {
        self.assembler.lock().reset();
    }

    pub fn server_time_offset_secs(&self) -> i64 {
        self.time_offset_secs.load(Ordering::Relaxed)
    }
}

fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
