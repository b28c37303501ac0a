//! Notifications exposed to the embedding application.
//!
//! | Event | Fires on |
//! |-------|----------|
//! | [`StateEvent`] | every device-state transition |
//! | [`TtsTextEvent`] | each `sentence_start` from the server |
//! | [`EmotionEvent`] | each `llm` emotion hint |
//! | [`ConnectionEvent`] | transport up (post-hello) / down |
//!
//! All sends happen inside the foreground-queue drain, so subscribers
//! observe a single-threaded, totally ordered stream regardless of
//! which thread produced the underlying event.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::state::DeviceState;

/// Broadcast capacity per channel; slow subscribers lag, they never
/// block the engine.
const BROADCAST_CAP: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEvent {
    pub state: DeviceState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsTextEvent {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionEvent {
    pub emotion: Emotion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEvent {
    pub connected: bool,
}

/// Emotion vocabulary the assistant annotates replies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprise,
    Disgust,
    Fear,
    Unknown,
}

impl Emotion {
    /// Map the server's free-text label; anything unrecognized is
    /// [`Emotion::Unknown`].
    pub fn from_label(label: &str) -> Emotion {
        match label {
            "neutral" => Emotion::Neutral,
            "happy" => Emotion::Happy,
            "sad" => Emotion::Sad,
            "angry" => Emotion::Angry,
            "surprise" => Emotion::Surprise,
            "disgust" => Emotion::Disgust,
            "fear" => Emotion::Fear,
            _ => Emotion::Unknown,
        }
    }
}

/// The engine's named event-subscriber slots.
pub struct EventHub {
    pub(crate) state_tx: broadcast::Sender<StateEvent>,
    pub(crate) tts_tx: broadcast::Sender<TtsTextEvent>,
    pub(crate) emotion_tx: broadcast::Sender<EmotionEvent>,
    pub(crate) connection_tx: broadcast::Sender<ConnectionEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (tts_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (emotion_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (connection_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            state_tx,
            tts_tx,
            emotion_tx,
            connection_tx,
        }
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<StateEvent> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_tts_text(&self) -> broadcast::Receiver<TtsTextEvent> {
        self.tts_tx.subscribe()
    }

    pub fn subscribe_emotion(&self) -> broadcast::Receiver<EmotionEvent> {
        self.emotion_tx.subscribe()
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection_tx.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
