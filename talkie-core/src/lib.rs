//! # talkie-core
//!
//! On-device session & audio/protocol engine for a voice-interactive
//! companion.
//!
//! ## Architecture
//!
//! ```text
//! Transport bytes → FrameAssembler → Envelope → Payload dispatch
//!                                                   │
//!                       ┌───────────────────────────┤
//!                       │ control JSON              │ BytesMsg
//!                       ▼                           ▼
//!                DeviceState machine         PlaybackQueue
//!                (single transition path)          │
//!                       │                    audio loop: decode → play
//!                       │                          ▲
//!  foreground loop: drain tasks, keepalive         │ capture loop:
//!  notify state/tts/emotion/connection             │ encode → send
//!                       ▲                          │
//!                  TaskQueue (fg)            TaskQueue (audio)
//! ```
//!
//! The engine talks to the platform exclusively through capability
//! traits (transport, codec, devices, wake detector, echo canceller,
//! key-value store, tool dispatcher). Four logical threads cooperate
//! through the two task queues, the playback queue, and the atomic
//! device state — never through shared mutable structures.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod state;
pub mod storage;
pub mod tools;
pub mod transport;
pub mod wake;

// Convenience re-exports for embedding applications
pub use config::EngineConfig;
pub use engine::{Collaborators, Engine};
pub use error::TalkieError;
pub use events::{ConnectionEvent, Emotion, EmotionEvent, StateEvent, TtsTextEvent};
pub use protocol::control::ListeningMode;
pub use state::DeviceState;
