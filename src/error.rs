use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

/// Top-level error for a voice ordering session.
///
/// Only the fatal variants ever reach the caller: microphone access and
/// connection failures end the session. Per-frame and per-payload problems
/// (`FrameFormat`, `ToolPayload`, `PlaybackBuffer`) are logged and absorbed
/// where they occur and exist here for the rare paths that need to name them.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Microphone access denied: {0}")]
    MicAccessDenied(String),

    #[error("Agent connection failed: {0}")]
    Connect(String),

    #[error("Audio frame format error: {0}")]
    FrameFormat(String),

    #[error("Malformed tool payload: {0}")]
    ToolPayload(String),

    #[error("Playback buffer error: {0}")]
    PlaybackBuffer(String),

    #[error("Order submission error: {0}")]
    Submission(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<crate::config::ConfigError> for SessionError {
    fn from(e: crate::config::ConfigError) -> Self {
        SessionError::Config(e.to_string())
    }
}

impl From<crate::capture::CaptureError> for SessionError {
    fn from(e: crate::capture::CaptureError) -> Self {
        match e {
            crate::capture::CaptureError::AccessDenied(msg) => SessionError::MicAccessDenied(msg),
            other => SessionError::MicAccessDenied(other.to_string()),
        }
    }
}

impl From<crate::session::ClientError> for SessionError {
    fn from(e: crate::session::ClientError) -> Self {
        SessionError::Connect(e.to_string())
    }
}

impl From<crate::ledger::LedgerError> for SessionError {
    fn from(e: crate::ledger::LedgerError) -> Self {
        SessionError::Submission(e.to_string())
    }
}
