//! Engine configuration.

use std::time::Duration;

use crate::protocol::control::ListeningMode;

/// Configuration for [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Display name sent with the guest login. Default: `"talkie"`.
    pub device_name: String,
    /// Microphone capture rate in Hz. The encoder always runs at this
    /// rate; the speaker rate is negotiated with the server and may
    /// differ. Default: 16000.
    pub capture_sample_rate: u32,
    /// Duration of one opus frame in milliseconds. Default: 60.
    pub frame_duration_ms: u32,
    /// Keepalive interval while connected. Default: 5 s.
    pub ping_interval: Duration,
    /// Receive-buffer bound for the wire codec. A connection that
    /// accumulates more pending bytes than this is treated as a
    /// protocol violation. Default: 32 KiB.
    pub recv_buffer_bytes: usize,
    /// Playback queue bound in packets. At 60 ms per packet the
    /// default of 256 holds ≈ 15 s of audio; packets arriving beyond
    /// the bound are dropped with a warning. Default: 256.
    pub playback_queue_packets: usize,
    /// Wake-word pre-roll retention in samples at the capture rate.
    /// Default: 16000 (1 s).
    pub pre_roll_samples: usize,
    /// Echo reference retention in samples at the capture rate.
    /// Default: 1024.
    pub echo_reference_samples: usize,
    /// Mode announced in the "start listening" control message when no
    /// echo canceller owns the turn. Default: [`ListeningMode::Auto`].
    pub listening_mode: ListeningMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_name: "talkie".to_string(),
            capture_sample_rate: 16_000,
            frame_duration_ms: 60,
            ping_interval: Duration::from_secs(5),
            recv_buffer_bytes: 32 * 1024,
            playback_queue_packets: 256,
            pre_roll_samples: 16_000,
            echo_reference_samples: 1024,
            listening_mode: ListeningMode::Auto,
        }
    }
}

impl EngineConfig {
    /// Samples per opus frame at the capture rate.
    pub fn samples_per_frame(&self) -> usize {
        (self.capture_sample_rate / 1000) as usize * self.frame_duration_ms as usize
    }
}
