//! Error handling for the inference publisher

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Broker connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// Frame could not be captured from the device
    #[error("Capture error: {0}")]
    Capture(String),

    /// Capture device could not be opened at startup
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Classifier answered but rejected the request
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Classifier runner process is gone or speaks garbage
    #[error("Runner error: {0}")]
    Runner(String),

    /// Raw classification could not be turned into a payload
    #[error("Normalize error: {0}")]
    Normalize(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the inference loop should skip the cycle and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Capture(_) | Error::Classifier(_) | Error::Normalize(_)
        )
    }

    /// Short category name for structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Connection(_) => "connection",
            Error::Capture(_) => "capture",
            Error::DeviceUnavailable(_) => "device_unavailable",
            Error::Classifier(_) => "classifier",
            Error::Runner(_) => "runner",
            Error::Normalize(_) => "normalize",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
        }
    }
}
