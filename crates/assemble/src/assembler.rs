use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use genworker_artifacts::{StructureValidator, ValidationError};
use tracing::{info, warn};

use crate::{AssembleError, CONCAT_LIST_SUFFIX, MediaTool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleConfig {
    /// A fast-path output below this size counts as failed.
    pub min_output_size: u64,
    pub crf: u8,
    pub video_codec: String,
    pub pix_fmt: String,
}

impl Default for AssembleConfig {
    fn default() -> Self {
        Self {
            min_output_size: 50_000,
            crf: 19,
            video_codec: "libx264".into(),
            pix_fmt: "yuv420p".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// One segment, returned as is.
    Single,
    FastConcat,
    ReEncode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedOutput {
    pub path: PathBuf,
    pub strategy: MergeStrategy,
    pub segments: usize,
}

/// What was observed after the stream-copy concat ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastPathObservation {
    pub exit_ok: bool,
    /// `None` when the output file does not exist.
    pub output_size: Option<u64>,
    /// `None` when validation was not reached.
    pub structurally_valid: Option<bool>,
}

/// Why the fast path's result cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPathFailure {
    ToolFailed,
    MissingOutput,
    Undersized { size: u64, min: u64 },
    Invalid,
}

impl fmt::Display for FastPathFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToolFailed => write!(f, "concat process failed"),
            Self::MissingOutput => write!(f, "no output written"),
            Self::Undersized { size, min } => write!(f, "output is {size} bytes, below {min}"),
            Self::Invalid => write!(f, "output failed validation"),
        }
    }
}

/// Decides whether to fall back to re-encoding. `None` keeps the fast
/// result.
pub fn judge_fast_path(obs: &FastPathObservation, min_output_size: u64) -> Option<FastPathFailure> {
    if !obs.exit_ok {
        return Some(FastPathFailure::ToolFailed);
    }
    let Some(size) = obs.output_size else {
        return Some(FastPathFailure::MissingOutput);
    };
    if size < min_output_size {
        return Some(FastPathFailure::Undersized {
            size,
            min: min_output_size,
        });
    }
    if obs.structurally_valid == Some(false) {
        return Some(FastPathFailure::Invalid);
    }
    None
}

/// `<output>.concat_list.txt`.
pub fn concat_list_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(CONCAT_LIST_SUFFIX);
    PathBuf::from(name)
}

/// Writes a concat demuxer list, one `file '<path>'` line per segment.
pub async fn write_concat_list(list: &Path, segments: &[PathBuf]) -> std::io::Result<()> {
    let mut body = String::new();
    for segment in segments {
        let quoted = segment.to_string_lossy().replace('\'', r"'\''");
        body.push_str(&format!("file '{quoted}'\n"));
    }
    tokio::fs::write(list, body).await
}

/// Joins video segments with an external tool.
pub struct MediaAssembler<T, V> {
    tool: T,
    validator: V,
    config: AssembleConfig,
}

impl<T: MediaTool, V: StructureValidator> MediaAssembler<T, V> {
    pub fn new(tool: T, validator: V, config: AssembleConfig) -> Self {
        Self {
            tool,
            validator,
            config,
        }
    }

    /// Merges `segments` in the given order into `output`.
    ///
    /// A single segment is returned unchanged without running the tool.
    pub async fn merge(
        &self,
        segments: &[PathBuf],
        output: &Path,
    ) -> Result<MergedOutput, AssembleError> {
        match segments {
            [] => return Err(AssembleError::Empty),
            [only] => {
                return Ok(MergedOutput {
                    path: only.clone(),
                    strategy: MergeStrategy::Single,
                    segments: 1,
                });
            }
            _ => {}
        }

        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let list = concat_list_path(output);
        write_concat_list(&list, segments).await?;

        let result = self.concat(&list, segments.len(), output).await;
        if let Err(e) = tokio::fs::remove_file(&list).await {
            warn!(list = %list.display(), error = %e, "could not remove concat list");
        }
        let strategy = result?;

        Ok(MergedOutput {
            path: output.to_path_buf(),
            strategy,
            segments: segments.len(),
        })
    }

    async fn concat(
        &self,
        list: &Path,
        count: usize,
        output: &Path,
    ) -> Result<MergeStrategy, AssembleError> {
        info!(segments = count, output = %output.display(), "concat (stream copy)");
        match tokio::fs::remove_file(output).await {
            Ok(()) => info!(output = %output.display(), "removed stale output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let fast = self.run(&self.fast_args(list, output)).await?;

        let mut obs = FastPathObservation {
            exit_ok: fast.success,
            output_size: file_size(output).await,
            structurally_valid: None,
        };
        if judge_fast_path(&obs, self.config.min_output_size).is_none() {
            obs.structurally_valid = match self.validator.validate(output).await {
                Ok(()) => Some(true),
                Err(e @ ValidationError::Spawn { .. }) => return Err(AssembleError::Validator(e)),
                Err(e) => {
                    warn!(output = %output.display(), error = %e, "stream copy output rejected");
                    Some(false)
                }
            };
        }

        let Some(failure) = judge_fast_path(&obs, self.config.min_output_size) else {
            info!(output = %output.display(), "stream copy concat succeeded");
            return Ok(MergeStrategy::FastConcat);
        };

        warn!(
            reason = %failure,
            code = ?fast.code,
            stderr = %fast.stderr,
            "stream copy concat unusable, re-encoding"
        );
        self.reencode(list, count, output).await?;
        Ok(MergeStrategy::ReEncode)
    }

    async fn reencode(&self, list: &Path, count: usize, output: &Path) -> Result<(), AssembleError> {
        info!(segments = count, output = %output.display(), crf = self.config.crf, "concat (re-encode)");
        let out = self.run(&self.reencode_args(list, output)).await?;
        if !out.success {
            return Err(AssembleError::ReEncodeFailed {
                code: out.code,
                stderr: out.stderr,
            });
        }
        if file_size(output).await.is_none() {
            return Err(AssembleError::MissingOutput {
                path: output.to_path_buf(),
            });
        }
        self.validator
            .validate(output)
            .await
            .map_err(|source| match source {
                e @ ValidationError::Spawn { .. } => AssembleError::Validator(e),
                source => AssembleError::InvalidOutput {
                    path: output.to_path_buf(),
                    source,
                },
            })
    }

    async fn run(&self, args: &[OsString]) -> Result<crate::ToolOutput, AssembleError> {
        self.tool
            .run(args)
            .await
            .map_err(|source| AssembleError::Spawn {
                program: self.tool.program(),
                source,
            })
    }

    fn fast_args(&self, list: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-y", "-fflags", "+genpts"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.extend(input_args(list));
        args.extend(["-c", "copy"].map(OsString::from));
        args.push(output.as_os_str().to_owned());
        args
    }

    fn reencode_args(&self, list: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-y"].map(OsString::from).to_vec();
        args.extend(input_args(list));
        args.extend(
            [
                "-c:v".to_string(),
                self.config.video_codec.clone(),
                "-pix_fmt".to_string(),
                self.config.pix_fmt.clone(),
                "-crf".to_string(),
                self.config.crf.to_string(),
            ]
            .map(OsString::from),
        );
        args.push(output.as_os_str().to_owned());
        args
    }
}

fn input_args(list: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-f", "concat", "-safe", "0", "-i"].map(OsString::from).to_vec();
    args.push(list.as_os_str().to_owned());
    args
}

async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}
