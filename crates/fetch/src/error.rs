use genworker_http::ChannelError;

/// Errors produced by the fetch crate.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("gave up after {attempts} attempts")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    #[error("batch deadline passed after {attempts} attempts")]
    DeadlineExceeded { attempts: u32 },

    #[error("worker stopped before finishing the job: {0}")]
    WorkerLost(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("unknown dependency type: {0}")]
    UnknownKind(String),

    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("{} of {total} downloads failed: {}", .failed.len(), .failed.join(", "))]
    Incomplete { total: usize, failed: Vec<String> },
}

impl FetchError {
    /// Transport-level transient failures and 429/5xx statuses.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Channel(e) => e.is_transient(),
            Self::Status { status, .. } => matches!(
                genworker_http::classify_status(*status),
                Some(genworker_http::ErrorClass::Transient)
            ),
            _ => false,
        }
    }
}
