//! Error types for the voice bot

use thiserror::Error;

/// Result type alias for bot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the bot
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credential, bad settings document)
    #[error("configuration error: {0}")]
    Config(String),

    /// Completion endpoint answered with a non-success status
    #[error("API responded with status {status}: {body}")]
    Network {
        /// HTTP status code
        status: u16,
        /// Response body as returned by the endpoint
        body: String,
    },

    /// A streamed chunk could not be parsed
    #[error("malformed stream chunk: {0}")]
    MalformedChunk(String),

    /// Speech recognition fault
    #[error("recognition error: {0}")]
    Recognition(#[from] RecognitionError),

    /// Speech synthesis fault
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error came from the network layer
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Http(_))
    }
}

/// Faults reported by a recognition session
///
/// Codes mirror the ones speech engines conventionally report, so logs stay
/// comparable across engines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    /// Session ended without hearing any speech
    #[error("no-speech")]
    NoSpeech,

    /// Session was cancelled
    #[error("aborted")]
    Aborted,

    /// Capture device failed
    #[error("audio-capture: {0}")]
    AudioCapture(String),

    /// Recognition service unreachable
    #[error("network: {0}")]
    Network(String),

    /// Permission to use the microphone was refused
    #[error("not-allowed")]
    NotAllowed,

    /// Recognition service refused the request
    #[error("service-not-allowed")]
    ServiceNotAllowed,

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl RecognitionError {
    /// Short machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoSpeech => "no-speech",
            Self::Aborted => "aborted",
            Self::AudioCapture(_) => "audio-capture",
            Self::Network(_) => "network",
            Self::NotAllowed => "not-allowed",
            Self::ServiceNotAllowed => "service-not-allowed",
            Self::Other(_) => "other",
        }
    }

    /// Routine faults are restarted silently
    #[must_use]
    pub const fn is_routine(&self) -> bool {
        matches!(self, Self::NoSpeech)
    }
}
