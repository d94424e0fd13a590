//! Error types for the debate controller.

use std::fmt;

use thiserror::Error;

/// A platform capability that may be missing on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Speech-to-text capture.
    SpeechCapture,
    /// Text-to-speech synthesis.
    SpeechSynthesis,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::SpeechCapture => write!(f, "speech recognition"),
            Capability::SpeechSynthesis => write!(f, "speech synthesis"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DebateError {
    #[error("{0} is not supported on this platform")]
    UnsupportedCapability(Capability),

    #[error("No API key configured; set a key starting with sk- first")]
    MissingCredential,

    #[error("{0}")]
    InvalidCredential(String),

    #[error("Remote model returned HTTP {status}")]
    RemoteError { status: u16 },

    #[error("Request to remote model failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote answered but carried no usable text. Displays the fallback string.
    #[error("{fallback}")]
    MalformedResponse { fallback: String },

    #[error("Debate sequence exhausted")]
    SequenceExhausted,

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("A capture session is already active")]
    CaptureAlreadyActive,

    #[error("Not recording")]
    CaptureNotActive,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("OpenAI request error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("TTS error: {0}")]
    TtsError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
