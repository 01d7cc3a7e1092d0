//! Error types for the tutor.

/// Message shown to the user whenever a realtime session cannot be started.
pub const CONNECT_FAILED_MESSAGE: &str =
    "Could not access microphone or connect. Please check permissions and try again.";

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    /// Microphone access denied or no capture device available.
    #[error("permission error: {0}")]
    Permission(String),

    /// WebSocket handshake, setup or transport failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed inbound payload.
    #[error("format error: {0}")]
    Format(String),

    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Text-mode request failure.
    #[error("chat error: {0}")]
    Chat(String),
}

impl TutorError {
    /// Text surfaced to the user. Setup failures share one generic message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Permission(_) | Self::Connection(_) => CONNECT_FAILED_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TutorError>;
