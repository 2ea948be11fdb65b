use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use genworker_artifacts::stderr_tail;

pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = std::io::Result<ToolOutput>> + Send + 'a>>;

/// Exit status and diagnostics of one tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    /// Tail of stderr.
    pub stderr: String,
}

/// An external encode/decode command.
///
/// `Err` means the command could not be started at all.
pub trait MediaTool: Send + Sync {
    fn program(&self) -> String;

    fn run<'a>(&'a self, args: &'a [OsString]) -> ToolFuture<'a>;
}

impl<T: MediaTool + ?Sized> MediaTool for &T {
    fn program(&self) -> String {
        (**self).program()
    }

    fn run<'a>(&'a self, args: &'a [OsString]) -> ToolFuture<'a> {
        (**self).run(args)
    }
}

/// Runs `ffmpeg` as a child process.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    program: PathBuf,
}

impl Default for FfmpegTool {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl MediaTool for FfmpegTool {
    fn program(&self) -> String {
        self.program.display().to_string()
    }

    fn run<'a>(&'a self, args: &'a [OsString]) -> ToolFuture<'a> {
        Box::pin(async move {
            let output = tokio::process::Command::new(&self.program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await?;
            Ok(ToolOutput {
                success: output.status.success(),
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_io_error() {
        let tool = FfmpegTool::new("/nonexistent/ffmpeg-for-tests");
        assert!(tool.run(&[OsString::from("-version")]).await.is_err());
        assert_eq!(tool.program(), "/nonexistent/ffmpeg-for-tests");
    }
}
