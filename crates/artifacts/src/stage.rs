use std::path::{Path, PathBuf};

use tracing::info;

use crate::WatchError;

/// Copies an accepted artifact to `staging_dir/name`, creating the directory.
///
/// The external writer keeps ownership of `src`; uploads read the copy.
pub async fn stage_artifact(src: &Path, staging_dir: &Path, name: &str) -> Result<PathBuf, WatchError> {
    tokio::fs::create_dir_all(staging_dir).await?;
    let dest = staging_dir.join(name);
    let bytes = tokio::fs::copy(src, &dest).await?;
    info!(src = %src.display(), dest = %dest.display(), bytes, "artifact staged");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn copies_into_new_dir() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("out.mp4");
        std::fs::write(&src, b"video bytes").unwrap();

        let staged = stage_artifact(&src, &dir.path().join("tmp/worker"), "wan_1.mp4")
            .await
            .unwrap();
        assert_eq!(staged, dir.path().join("tmp/worker/wan_1.mp4"));
        assert_eq!(std::fs::read(&staged).unwrap(), b"video bytes");
        assert!(src.exists());
    }

    #[tokio::test]
    async fn missing_source_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = stage_artifact(&dir.path().join("gone.mp4"), dir.path(), "x.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::Io(_)));
    }
}
