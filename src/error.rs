use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Clone, Error)]
pub enum ConversionError {
    #[error("context cancelled")]
    Canceled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("downloading {url:?}: unexpected response status {code}")]
    UnexpectedStatus { url: String, code: u16 },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Worker failed: {0}")]
    Worker(String),
}

impl ConversionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ConversionError::Canceled => ErrorClass::Canceled,
            ConversionError::Network(_) => ErrorClass::Network,
            ConversionError::UnexpectedStatus { .. } => ErrorClass::UnexpectedStatus,
            ConversionError::Decode(_) => ErrorClass::Decode,
            ConversionError::Encode(_) => ErrorClass::Encode,
            ConversionError::Io(_) => ErrorClass::Io,
            ConversionError::InvalidSource(_) => ErrorClass::InvalidSource,
            ConversionError::Configuration(_) => ErrorClass::Configuration,
            ConversionError::Worker(_) => ErrorClass::Worker,
        }
    }

    /// Errors that stem from the remote side rather than the local machine.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            ConversionError::Network(_) | ConversionError::UnexpectedStatus { .. }
        )
    }
}

/// Coarse failure class, comparable without the error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Canceled,
    Network,
    UnexpectedStatus,
    Decode,
    Encode,
    Io,
    InvalidSource,
    Configuration,
    Worker,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Canceled => "canceled",
            ErrorClass::Network => "network",
            ErrorClass::UnexpectedStatus => "unexpected_status",
            ErrorClass::Decode => "decode",
            ErrorClass::Encode => "encode",
            ErrorClass::Io => "io",
            ErrorClass::InvalidSource => "invalid_source",
            ErrorClass::Configuration => "configuration",
            ErrorClass::Worker => "worker",
        }
    }
}

impl From<std::io::Error> for ConversionError {
    fn from(err: std::io::Error) -> Self {
        ConversionError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ConversionError {
    fn from(err: serde_json::Error) -> Self {
        ConversionError::Configuration(err.to_string())
    }
}

impl From<reqwest::Error> for ConversionError {
    fn from(err: reqwest::Error) -> Self {
        ConversionError::Network(err.to_string())
    }
}

impl From<JoinError> for ConversionError {
    fn from(err: JoinError) -> Self {
        ConversionError::Worker(err.to_string())
    }
}
