use std::path::PathBuf;

use genworker_artifacts::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("no segments to merge")]
    Empty,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot validate merged output: {0}")]
    Validator(#[source] ValidationError),

    #[error("re-encode concat failed (exit {code:?}): {stderr}")]
    ReEncodeFailed { code: Option<i32>, stderr: String },

    #[error("re-encode produced no output at {}", .path.display())]
    MissingOutput { path: PathBuf },

    #[error("re-encode produced an invalid file at {}", .path.display())]
    InvalidOutput {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },
}
