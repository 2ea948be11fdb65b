//! Artifact materialisation.
//!
//! An external process writes output files at its own pace. The
//! [`ArtifactWatcher`] polls a [`FsView`] until a matching file has stopped
//! growing and, for container formats, passes a [`StructureValidator`].

mod error;
mod fs;
mod stage;
mod validator;
mod watcher;

pub use error::{ValidationError, WatchError};
pub use fs::{FileStat, FsView, LocalFs};
pub use stage::stage_artifact;
pub use validator::{FfprobeValidator, StructureValidator, ValidateFuture, stderr_tail};
pub use watcher::{ArtifactCandidate, ArtifactWatcher, WatchConfig};

/// Bytes of a failing tool's stderr kept for diagnostics.
pub const STDERR_TAIL_LIMIT: usize = 2000;
