//! Device state — the single value every thread reads to decide what
//! the audio tick is allowed to do.
//!
//! The state is stored in an atomic cell so readers never take a lock.
//! Writes go through `Engine::transition` only, which serializes them
//! behind a dedicated mutex; the cell itself needs no further guarding.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Conversation state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DeviceState {
    /// Passive: speaker off, wake-word detection running.
    Idle = 0,
    /// Wake word fired while the transport was down (or the wake burst
    /// is still being flushed); waiting for the session to come up.
    Connecting = 1,
    /// Server TTS audio is queued or playing.
    Speaking = 2,
    /// Microphone audio is being encoded and streamed to the server.
    Listening = 3,
    /// Firmware update in progress. Terminal as far as this crate is
    /// concerned.
    Upgrading = 4,
}

impl DeviceState {
    /// Lowercase name used in logs and state-change notifications.
    pub fn name(self) -> &'static str {
        match self {
            DeviceState::Idle => "idle",
            DeviceState::Connecting => "connecting",
            DeviceState::Speaking => "speaking",
            DeviceState::Listening => "listening",
            DeviceState::Upgrading => "upgrading",
        }
    }

    fn from_u8(raw: u8) -> DeviceState {
        match raw {
            1 => DeviceState::Connecting,
            2 => DeviceState::Speaking,
            3 => DeviceState::Listening,
            4 => DeviceState::Upgrading,
            _ => DeviceState::Idle,
        }
    }
}

/// Lock-free holder for the current [`DeviceState`].
///
/// Single writer (the transition path), any number of readers.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(initial: DeviceState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> DeviceState {
        DeviceState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, next: DeviceState) {
        self.0.store(next as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(DeviceState::Idle)
    }
}
