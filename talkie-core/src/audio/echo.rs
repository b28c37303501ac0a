//! Echo reference path for acoustic echo cancellation.
//!
//! While the device speaks, the most recently played samples are kept
//! in a short loopback buffer. Each audio tick interleaves the newest
//! reference samples with the captured microphone samples as a stereo
//! `(mic, ref)` pair, which is what the canceller consumes. When the
//! speaker and capture rates differ the reference is resampled to the
//! capture rate first — the canceller's two channels must be sample
//! aligned.

use std::collections::VecDeque;

use crate::audio::resample::ReferenceResampler;
use crate::error::Result;

/// Acoustic echo canceller capability interface.
///
/// The DSP itself is an external collaborator. Cleaned audio comes
/// back through the `on_output` callback; the engine forwards it into
/// the encode→send path on the audio task queue.
pub trait EchoCanceller: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn is_running(&self) -> bool;
    /// Feed one stereo-interleaved `(mic, ref)` block.
    fn feed(&self, interleaved: &[i16]);
    /// Register the cleaned-audio callback. Called once at engine start.
    fn on_output(&self, callback: Box<dyn Fn(Vec<i16>) + Send + Sync>);
}

/// Loopback buffer + reference-path resampler.
///
/// Touched only from the audio thread; the engine wraps it in a mutex
/// solely so hello-time reconfiguration can reach it.
pub struct EchoReference {
    buffer: VecDeque<i16>,
    capacity: usize,
    resampler: Option<ReferenceResampler>,
}

impl EchoReference {
    /// `capacity` is in samples at the capture rate.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            resampler: None,
        }
    }

    /// Install (or drop) the reference-path resampler after the hello
    /// negotiates the speaker rate.
    pub fn configure(
        &mut self,
        speaker_rate: u32,
        capture_rate: u32,
        chunk_size: usize,
    ) -> Result<()> {
        self.resampler = if speaker_rate == capture_rate {
            None
        } else {
            Some(ReferenceResampler::new(
                speaker_rate,
                capture_rate,
                chunk_size,
            )?)
        };
        self.buffer.clear();
        Ok(())
    }

    /// Record just-played samples (at the speaker rate) into the
    /// loopback buffer, oldest samples evicted first.
    pub fn record(&mut self, played: &[i16]) {
        let reference = match self.resampler.as_mut() {
            Some(resampler) => resampler.process(played),
            None => played.to_vec(),
        };
        for sample in reference {
            if self.buffer.len() == self.capacity {
                self.buffer.pop_front();
            }
            self.buffer.push_back(sample);
        }
    }

    /// Interleave the *newest* `mic.len()` reference samples with the
    /// captured block. `None` until enough reference has accumulated —
    /// feeding a half-aligned pair is worse than skipping the block.
    pub fn interleave(&self, mic: &[i16]) -> Option<Vec<i16>> {
        if mic.is_empty() || self.buffer.len() < mic.len() {
            return None;
        }
        let start = self.buffer.len() - mic.len();
        let mut out = Vec::with_capacity(mic.len() * 2);
        for (i, &m) in mic.iter().enumerate() {
            out.push(m);
            out.push(self.buffer[start + i]);
        }
        Some(out)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
