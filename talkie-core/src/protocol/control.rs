//! JSON control sub-protocol carried inside `Msg.text`.
//!
//! Every message is a JSON object with a `"type"` tag and a
//! `session_id`. Unknown tags fail to parse and are skipped by the
//! dispatcher — the server is free to grow the protocol without
//! breaking old devices.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TalkieError};

/// Tagged control message, both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Tts {
        #[serde(default)]
        session_id: Option<String>,
        state: TtsState,
        #[serde(default)]
        text: Option<String>,
    },
    Listen {
        #[serde(default)]
        session_id: Option<String>,
        state: ListenState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<ListeningMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Abort {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    Llm {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        emotion: Option<String>,
    },
    Stt {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
    Iot {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        commands: Option<serde_json::Value>,
    },
    Mcp {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(flatten)]
        body: serde_json::Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsState {
    Start,
    Stop,
    SentenceStart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenState {
    Start,
    Stop,
    Detect,
}

/// How a listening turn ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListeningMode {
    /// Full duplex; requires an echo canceller.
    Realtime,
    /// Server decides when the utterance is over.
    Auto,
    /// Device ends the turn explicitly.
    Manual,
}

impl ControlMessage {
    /// `{"type":"listen","state":"start","mode":...}` — opens a
    /// listening turn.
    pub fn listen_start(session_id: &str, mode: ListeningMode) -> ControlMessage {
        ControlMessage::Listen {
            session_id: Some(session_id.to_string()),
            state: ListenState::Start,
            mode: Some(mode),
            text: None,
        }
    }

    /// `{"type":"listen","state":"detect","text":<phrase>}` — tells the
    /// server which wake phrase was recognized.
    pub fn listen_detect(session_id: &str, phrase: &str) -> ControlMessage {
        ControlMessage::Listen {
            session_id: Some(session_id.to_string()),
            state: ListenState::Detect,
            mode: None,
            text: Some(phrase.to_string()),
        }
    }

    /// `{"type":"abort","reason":"wake_word_detected"}` — cancels an
    /// in-progress speaking turn.
    pub fn abort_wake_word(session_id: &str) -> ControlMessage {
        ControlMessage::Abort {
            session_id: Some(session_id.to_string()),
            reason: Some("wake_word_detected".to_string()),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            ControlMessage::Tts { session_id, .. }
            | ControlMessage::Listen { session_id, .. }
            | ControlMessage::Abort { session_id, .. }
            | ControlMessage::Llm { session_id, .. }
            | ControlMessage::Stt { session_id, .. }
            | ControlMessage::Iot { session_id, .. }
            | ControlMessage::Mcp { session_id, .. } => session_id.as_deref(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| TalkieError::Encode(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<ControlMessage> {
        serde_json::from_str(text).map_err(|e| TalkieError::Decode(e.to_string()))
    }
}
