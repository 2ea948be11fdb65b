//! Error types and failure classification.

/// How a failed exchange should be handled by a retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying after a backoff.
    Transient,
    /// The remote disagrees about an offset; recoverable in-protocol.
    Conflict,
    /// Retrying will not help.
    Fatal,
}

/// Classifies an HTTP status code. `None` means success (2xx).
pub fn classify_status(status: u16) -> Option<ErrorClass> {
    match status {
        200..=299 => None,
        409 => Some(ErrorClass::Conflict),
        429 | 500 | 502 | 503 | 504 => Some(ErrorClass::Transient),
        _ => Some(ErrorClass::Fatal),
    }
}

/// Errors produced below the HTTP status line.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ChannelError {
    /// Timeouts and connection failures are transient; everything else is fatal.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) | Self::Connect(_) => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
