use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use crate::{STDERR_TAIL_LIMIT, ValidationError};

pub type ValidateFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ValidationError>> + Send + 'a>>;

/// Checks that a finished file is structurally sound.
pub trait StructureValidator: Send + Sync {
    fn validate<'a>(&'a self, path: &'a Path) -> ValidateFuture<'a>;
}

impl<T: StructureValidator + ?Sized> StructureValidator for &T {
    fn validate<'a>(&'a self, path: &'a Path) -> ValidateFuture<'a> {
        (**self).validate(path)
    }
}

impl<T: StructureValidator + ?Sized> StructureValidator for std::sync::Arc<T> {
    fn validate<'a>(&'a self, path: &'a Path) -> ValidateFuture<'a> {
        (**self).validate(path)
    }
}

/// Probes media containers with `ffprobe`. A zero exit status means valid.
#[derive(Debug, Clone)]
pub struct FfprobeValidator {
    program: PathBuf,
}

impl Default for FfprobeValidator {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeValidator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl StructureValidator for FfprobeValidator {
    fn validate<'a>(&'a self, path: &'a Path) -> ValidateFuture<'a> {
        Box::pin(async move {
            let output = tokio::process::Command::new(&self.program)
                .args(["-hide_banner", "-v", "error", "-show_format", "-show_streams"])
                .arg(path)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|source| ValidationError::Spawn {
                    program: self.program.display().to_string(),
                    source,
                })?;

            if output.status.success() {
                tracing::debug!(path = %path.display(), "ffprobe accepted file");
                return Ok(());
            }
            Err(ValidationError::Rejected {
                path: path.to_path_buf(),
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            })
        })
    }
}

/// The last [`STDERR_TAIL_LIMIT`] bytes of a tool's stderr, lossily decoded.
pub fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_LIMIT);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}
