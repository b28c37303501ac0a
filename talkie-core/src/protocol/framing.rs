//! Length-prefixed framing over a zlib-compressed envelope stream.
//!
//! ## Wire layout
//!
//! ```text
//! ┌────────────────────┬──────────────────────────────┐
//! │ u32 big-endian len │ zlib payload (len bytes)     │ × N, no gaps
//! └────────────────────┴──────────────────────────────┘
//! ```
//!
//! `len` counts the *compressed* bytes. Frames arrive back to back;
//! the length prefix is the only delimiter, so a stream that fails to
//! inflate can never be resynchronized — such failures tear down the
//! connection.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::warn;

use crate::error::{Result, TalkieError};
use crate::protocol::envelope::Envelope;

/// Length prefix size.
const HEADER_LEN: usize = 4;

/// Serialize, compress, and frame one envelope.
///
/// Compression runs at the fastest level — the real-time budget matters
/// more than the ratio on these small messages.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>> {
    let raw = rmp_serde::to_vec_named(envelope).map_err(|e| TalkieError::Encode(e.to_string()))?;

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2 + 16), Compression::fast());
    encoder.write_all(&raw)?;
    let compressed = encoder.finish()?;

    let mut frame = Vec::with_capacity(HEADER_LEN + compressed.len());
    frame.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
    frame.extend_from_slice(&compressed);
    Ok(frame)
}

/// Inflate one frame payload, bounded by `max_len`.
fn inflate(data: &[u8], max_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 3);
    let mut decoder = ZlibDecoder::new(data).take(max_len as u64 + 1);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| TalkieError::ProtocolViolation(format!("inflate failed: {e}")))?;
    if out.len() > max_len {
        return Err(TalkieError::ProtocolViolation(format!(
            "inflated payload exceeds {max_len} bytes"
        )));
    }
    Ok(out)
}

/// Reassembles [`Envelope`]s from an arbitrarily chunked byte stream.
///
/// One assembler exists per connection; [`reset`](Self::reset) clears
/// it when the transport reconnects, since frame state never survives
/// the gap.
pub struct FrameAssembler {
    buf: Vec<u8>,
    capacity: usize,
}

impl FrameAssembler {
    /// `capacity` bounds both the pending-byte buffer and the inflated
    /// size of a single payload.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Discard any partially received frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Bytes currently waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Feed freshly received bytes and drain every complete frame.
    ///
    /// Handles zero pending frames, several frames per read, and a
    /// frame split across reads. A malformed *envelope* inside an
    /// intact frame is skipped with a warning (the boundary is still
    /// trustworthy); everything else in [`TalkieError::ProtocolViolation`]
    /// territory poisons the connection and must force a reconnect.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Envelope>> {
        if self.buf.len() + bytes.len() > self.capacity {
            return Err(TalkieError::ProtocolViolation(format!(
                "receive buffer overflow: {} + {} > {}",
                self.buf.len(),
                bytes.len(),
                self.capacity
            )));
        }
        self.buf.extend_from_slice(bytes);

        let mut out = Vec::new();
        while self.buf.len() >= HEADER_LEN {
            let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                as usize;
            if HEADER_LEN + len > self.capacity {
                return Err(TalkieError::ProtocolViolation(format!(
                    "frame of {len} bytes can never fit the {} byte buffer",
                    self.capacity
                )));
            }
            if self.buf.len() < HEADER_LEN + len {
                break; // split frame — wait for more bytes
            }

            let payload = inflate(&self.buf[HEADER_LEN..HEADER_LEN + len], self.capacity)?;
            match rmp_serde::from_slice::<Envelope>(&payload) {
                Ok(envelope) => out.push(envelope),
                Err(e) => warn!(error = %e, "skipping malformed envelope"),
            }

            // Shift the remaining bytes down by exactly one frame.
            self.buf.drain(..HEADER_LEN + len);
        }
        Ok(out)
    }
}
