//! Bounded FIFO of opus packets awaiting decode + playback.
//!
//! Written by the network thread (packet arrival), read by the audio
//! thread (one pop per tick), cleared by the transition path — each
//! under the queue's own lock, never the task-queue locks.
//!
//! The bound exists because the server streams faster than real time
//! while the device plays at exactly real time; a stalled consumer
//! must cost bounded memory. Packets past the bound are dropped newest
//! first — by the time the queue holds ~15 s of audio the turn is
//! unrecoverable anyway, and dropping the newest keeps what is already
//! scheduled contiguous.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::audio::OpusPacket;

pub struct PlaybackQueue {
    queue: Mutex<VecDeque<OpusPacket>>,
    capacity: usize,
    dropped: AtomicUsize,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            dropped: AtomicUsize::new(0),
        }
    }

    /// Append a packet in arrival order. Returns `false` when the
    /// bound was hit and the packet was dropped.
    pub fn push(&self, packet: OpusPacket) -> bool {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            drop(queue);
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                capacity = self.capacity,
                dropped, "playback queue full — dropping packet"
            );
            return false;
        }
        queue.push_back(packet);
        true
    }

    /// Pop the oldest packet. The lock is held only for the pop; the
    /// caller decodes and plays unlocked.
    pub fn pop(&self) -> Option<OpusPacket> {
        self.queue.lock().pop_front()
    }

    /// Atomically discard everything. Returns how many packets were
    /// dropped. Called on every transition out of Speaking.
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock();
        let cleared = queue.len();
        queue.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Packets dropped at the bound since construction.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}
