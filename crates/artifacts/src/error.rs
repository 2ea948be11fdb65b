use std::path::PathBuf;
use std::time::Duration;

/// A structural check could not be run or did not pass.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{} failed validation (exit {}): {stderr}", .path.display(), exit_label(.code))]
    Rejected {
        path: PathBuf,
        code: Option<i32>,
        stderr: String,
    },
}

/// Errors produced while waiting for or staging artifacts.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid selector {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error(transparent)]
    Validator(#[from] ValidationError),

    #[error("timed out after {waited:?} waiting for {selector}; last seen: [{}]", display_paths(.last_seen))]
    Timeout {
        selector: String,
        waited: Duration,
        last_seen: Vec<PathBuf>,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
