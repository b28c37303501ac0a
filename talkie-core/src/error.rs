use thiserror::Error;

/// All errors produced by talkie-core.
#[derive(Debug, Error)]
pub enum TalkieError {
    /// The byte stream can no longer be trusted: oversized frame,
    /// receive-buffer overflow, or a payload that fails to inflate.
    /// Frame boundaries cannot be rediscovered mid-stream, so the only
    /// recovery is a reconnect.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("envelope encode error: {0}")]
    Encode(String),

    #[error("envelope decode error: {0}")]
    Decode(String),

    #[error("resampler error: {0}")]
    Resample(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TalkieError>;
