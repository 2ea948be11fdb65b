//! Segment assembly.
//!
//! [`MediaAssembler`] joins ordered segments into one file. It tries a
//! stream-copy concat first and re-encodes only when [`judge_fast_path`]
//! reports a failure signal.

mod assembler;
mod error;
mod tool;

pub use assembler::{
    AssembleConfig, FastPathFailure, FastPathObservation, MediaAssembler, MergeStrategy,
    MergedOutput, concat_list_path, judge_fast_path, write_concat_list,
};
pub use error::AssembleError;
pub use tool::{FfmpegTool, MediaTool, ToolFuture, ToolOutput};

/// Suffix appended to the output path for the concat demuxer's list file.
pub const CONCAT_LIST_SUFFIX: &str = ".concat_list.txt";
