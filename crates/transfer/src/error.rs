use std::fmt;
use std::path::PathBuf;

use genworker_http::ChannelError;

/// Step of the upload handshake an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Chunk { offset: u64 },
    Finalize,
    /// Single-shot multipart upload.
    Whole,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::Chunk { offset } => write!(f, "chunk at offset {offset}"),
            Self::Finalize => f.write_str("finalize"),
            Self::Whole => f.write_str("upload"),
        }
    }
}

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{phase}: {source}")]
    Channel {
        phase: Phase,
        #[source]
        source: ChannelError,
    },

    #[error("{phase}: HTTP {status}: {body}")]
    Status {
        phase: Phase,
        status: u16,
        body: String,
    },

    #[error("{phase}: rejected by backend: {message}")]
    Rejected { phase: Phase, message: String },

    #[error("{phase}: gave up after {attempts} attempts")]
    ExhaustedRetries {
        phase: Phase,
        attempts: u32,
        #[source]
        last: Box<TransferError>,
    },

    #[error("{phase}: deadline exceeded")]
    DeadlineExceeded { phase: Phase },

    #[error("offset conflict unresolved after {conflicts} reseeks at offset {offset}")]
    UnresolvedConflict { offset: u64, conflicts: u32 },

    #[error("remote offset went backwards: confirmed {confirmed}, reported {reported}")]
    OffsetRegression { confirmed: u64, reported: u64 },

    #[error("remote offset {offset} is outside the file (size {total})")]
    OffsetOutOfRange { offset: u64, total: u64 },

    #[error("remote made no progress at offset {offset}")]
    NoProgress { offset: u64 },

    #[error("file changed during upload: {}", .path.display())]
    FileChanged { path: PathBuf },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransferError {
    pub(crate) fn channel(phase: Phase, source: ChannelError) -> Self {
        Self::Channel { phase, source }
    }
}
