//! Error types for sxm-link

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// sxm-link error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be read or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid parameter (filter or classifier precondition)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Status or payload serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed broker packet
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Link has no open connection to write to
    #[error("Not connected to broker")]
    NotConnected,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
