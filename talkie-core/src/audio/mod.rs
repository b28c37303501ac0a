//! Audio pipeline types and device/codec capability interfaces.
//!
//! PCM everywhere in this crate is mono `i16`. The codec, capture, and
//! playback implementations are external collaborators; the engine
//! drives them through the traits below and never sees a hardware
//! buffer or an opus bitstream internal.

pub mod echo;
pub mod playback;
pub mod resample;

/// One encoded audio frame of fixed duration.
///
/// Ownership moves producer → queue → consumer exactly once; packets
/// are never cloned into two live copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusPacket(pub Vec<u8>);

impl OpusPacket {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Opus encoder state for one stream direction.
///
/// Implementations may coalesce input internally: `encode` returns one
/// packet per full frame accumulated so far, which can be zero.
pub trait AudioEncoder: Send {
    fn encode(&mut self, pcm: &[i16]) -> Vec<OpusPacket>;
    fn reset_state(&mut self);
}

/// Opus decoder state for one stream direction.
pub trait AudioDecoder: Send {
    /// `None` means the packet was malformed; the caller drops it and
    /// keeps playing.
    fn decode(&mut self, packet: &OpusPacket) -> Option<Vec<i16>>;
    fn reset_state(&mut self);
}

/// Builds codec instances at the negotiated audio parameters.
///
/// The engine constructs its encoder/decoder lazily on the first
/// server hello and keeps them for the life of the connection
/// instance; the wake gate additionally builds short-lived encoders
/// for pre-roll bursts.
pub trait CodecFactory: Send + Sync {
    /// `complexity` follows opus conventions: 0 is fastest.
    fn new_encoder(
        &self,
        sample_rate: u32,
        channels: u8,
        frame_duration_ms: u32,
        complexity: u32,
    ) -> Box<dyn AudioEncoder>;

    fn new_decoder(
        &self,
        sample_rate: u32,
        channels: u8,
        frame_duration_ms: u32,
    ) -> Box<dyn AudioDecoder>;
}

/// Microphone.
pub trait CaptureDevice: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn set_sample_rate(&self, rate: u32);
    fn sample_rate(&self) -> u32;
    /// Drain whatever the device has accumulated since the last call.
    /// Non-blocking; empty when nothing is pending.
    fn pop_frames(&self) -> Vec<i16>;
}

/// Speaker.
pub trait PlaybackDevice: Send + Sync {
    fn set_enabled(&self, enabled: bool);
    fn set_volume(&self, volume: f32);
    fn set_sample_rate(&self, rate: u32);
    fn sample_rate(&self) -> u32;
    fn play(&self, pcm: &[i16]);
}
