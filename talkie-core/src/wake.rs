//! Wake word gate: the handshake between passive detection and an
//! active conversation turn.
//!
//! The detector DSP is an external collaborator; this module owns what
//! surrounds it — the pre-roll ring of recent microphone audio (so the
//! trigger phrase itself reaches the server), the priority burst
//! encoded from it, and the last recognized phrase. The resume-after-
//! reconnect flag lives in the engine, which sequences the whole flow.
//!
//! The pre-roll ring is a lock-free SPSC pair: the audio thread
//! produces, the foreground thread consumes at detection time.

use std::sync::Arc;

use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

use crate::audio::{CodecFactory, OpusPacket};

/// Pre-roll bursts are encoded with the cheapest opus complexity —
/// latency matters far more than bitrate for one second of audio.
const BURST_COMPLEXITY: u32 = 0;

/// Wake-word detector capability interface.
pub trait WakeWordDetector: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn is_running(&self) -> bool;
    fn feed(&self, pcm: &[i16]);
    /// Register the detection callback. Called once at engine start;
    /// the callback fires on the detector's own thread.
    fn on_detected(&self, callback: Box<dyn Fn(String) + Send + Sync>);
}

pub struct WakeWordGate {
    detector: Arc<dyn WakeWordDetector>,
    pre_roll_prod: Mutex<HeapProd<i16>>,
    pre_roll_cons: Mutex<HeapCons<i16>>,
    burst: Mutex<Vec<OpusPacket>>,
    last_phrase: Mutex<String>,
}

impl WakeWordGate {
    /// `pre_roll_capacity` is in samples at the capture rate.
    pub fn new(detector: Arc<dyn WakeWordDetector>, pre_roll_capacity: usize) -> Self {
        let (pre_roll_prod, pre_roll_cons) = HeapRb::<i16>::new(pre_roll_capacity).split();
        Self {
            detector,
            pre_roll_prod: Mutex::new(pre_roll_prod),
            pre_roll_cons: Mutex::new(pre_roll_cons),
            burst: Mutex::new(Vec::new()),
            last_phrase: Mutex::new(String::new()),
        }
    }

    pub fn detector(&self) -> &Arc<dyn WakeWordDetector> {
        &self.detector
    }

    pub fn start_detection(&self) {
        self.detector.start();
    }

    pub fn stop_detection(&self) {
        self.detector.stop();
    }

    pub fn is_detection_running(&self) -> bool {
        self.detector.is_running()
    }

    /// Feed one captured block: retained as pre-roll, then handed to
    /// the detector. Oldest pre-roll is evicted when the ring is full.
    pub fn feed(&self, pcm: &[i16]) {
        {
            let mut prod = self.pre_roll_prod.lock();
            let vacant = prod.vacant_len();
            if vacant < pcm.len() {
                self.pre_roll_cons.lock().skip(pcm.len() - vacant);
            }
            prod.push_slice(pcm);
        }
        self.detector.feed(pcm);
    }

    pub fn note_detected(&self, phrase: &str) {
        *self.last_phrase.lock() = phrase.to_string();
    }

    pub fn last_phrase(&self) -> String {
        self.last_phrase.lock().clone()
    }

    /// Drain the pre-roll ring and encode it as the priority burst,
    /// replacing any burst from an earlier detection that never got
    /// flushed.
    pub fn encode_pre_roll(
        &self,
        factory: &dyn CodecFactory,
        sample_rate: u32,
        frame_duration_ms: u32,
    ) {
        let pcm = {
            let mut cons = self.pre_roll_cons.lock();
            let mut pcm = vec![0i16; cons.occupied_len()];
            let taken = cons.pop_slice(&mut pcm);
            pcm.truncate(taken);
            pcm
        };
        if pcm.is_empty() {
            self.burst.lock().clear();
            return;
        }

        let mut encoder = factory.new_encoder(sample_rate, 1, frame_duration_ms, BURST_COMPLEXITY);
        let packets = encoder.encode(&pcm);
        *self.burst.lock() = packets;
    }

    /// Take the encoded burst for sending. The burst moves out exactly
    /// once; a second call returns empty.
    pub fn take_burst(&self) -> Vec<OpusPacket> {
        std::mem::take(&mut *self.burst.lock())
    }
}
