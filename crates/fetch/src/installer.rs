use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use genworker_http::{ChannelError, Deadline, HttpChannel, HttpRequest};
use genworker_protocol::{Dependency, DependencyKind, SourceKind};
use tracing::{debug, info};

use crate::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_WORKERS, FetchError, FetchJob, FetchPool,
    resolve_destination, safe_basename,
};

/// Where and how dependencies are installed.
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    pub model_dirs: HashMap<DependencyKind, PathBuf>,
    /// Backend endpoint serving named files (`token` + `name` query).
    pub backend_download_url: String,
    pub api_token: String,
    /// Sent as `Authorization: Bearer` for `civitai` sources.
    pub bearer_token: Option<String>,
    /// Files already present at or above this size are not fetched again.
    pub min_existing_size: u64,
    pub max_workers: usize,
    pub max_attempts: u32,
    pub request_timeout: Duration,
    /// Bound on one whole install; `None` waits as long as the retries do.
    pub total_timeout: Option<Duration>,
}

impl InstallerConfig {
    /// The usual model tree under `root`: `models/<kind>` plus `input`.
    pub fn with_root(root: &Path, backend_download_url: impl Into<String>) -> Self {
        use DependencyKind::*;
        let model_dirs = [Loras, Checkpoints, Vae, TextEncoders, DiffusionModels, Upscale]
            .into_iter()
            .map(|kind| (kind, root.join("models").join(kind.as_str())))
            .chain(std::iter::once((Input, root.join("input"))))
            .collect();
        Self {
            model_dirs,
            backend_download_url: backend_download_url.into(),
            api_token: String::new(),
            bearer_token: None,
            min_existing_size: 1024,
            max_workers: DEFAULT_MAX_WORKERS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: Duration::from_secs(600),
            total_timeout: Some(Duration::from_secs(3600)),
        }
    }
}

/// Routes task dependencies to model directories and downloads what is
/// missing through one [`FetchPool`] batch.
pub struct DependencyInstaller<F> {
    pool: FetchPool<F>,
    config: InstallerConfig,
}

impl<F, C> DependencyInstaller<F>
where
    F: Fn() -> Result<C, ChannelError> + Send + Sync + 'static,
    C: HttpChannel + 'static,
{
    pub fn new(pool: FetchPool<F>, config: InstallerConfig) -> Self {
        Self { pool, config }
    }

    /// Installs every dependency and returns the local path of each file.
    ///
    /// Entries without `url` or `type` are ignored. Any download failure
    /// fails the install with [`FetchError::Incomplete`].
    pub async fn install(&self, dependencies: &[Dependency]) -> Result<Vec<PathBuf>, FetchError> {
        let mut present = Vec::new();
        let mut jobs = Vec::new();

        for dep in dependencies {
            if dep.url.is_empty() || dep.kind.is_empty() {
                debug!(?dep, "skipping incomplete dependency entry");
                continue;
            }
            let dir = self.target_dir(dep)?;
            info!(
                url = %dep.url,
                url_type = ?dep.url_type,
                kind = %dep.kind,
                dir = %dir.display(),
                "resolving dependency"
            );

            for (source, request, dest) in self.plan(dep, dir)? {
                if self.already_present(&dest).await {
                    debug!(path = %dest.display(), "dependency already present");
                    present.push(dest);
                } else {
                    jobs.push(FetchJob::new(source, request, dest));
                }
            }
        }

        if jobs.is_empty() {
            return Ok(present);
        }

        let fetched = self
            .pool
            .fetch_all(
                jobs,
                self.config.max_workers,
                self.config.max_attempts,
                Deadline::after(self.config.total_timeout),
            )
            .await
            .into_result()?;
        present.extend(fetched);
        Ok(present)
    }

    fn target_dir(&self, dep: &Dependency) -> Result<&Path, FetchError> {
        dep.target_kind()
            .and_then(|kind| self.config.model_dirs.get(&kind))
            .map(PathBuf::as_path)
            .ok_or_else(|| FetchError::UnknownKind(dep.kind.clone()))
    }

    fn plan(
        &self,
        dep: &Dependency,
        dir: &Path,
    ) -> Result<Vec<(String, HttpRequest, PathBuf)>, FetchError> {
        let timeout = self.config.request_timeout;
        match dep.url_type {
            SourceKind::Simple | SourceKind::Civitai => {
                let name = match dep.file_name.as_deref() {
                    Some(name) if !name.is_empty() => safe_basename(name)?,
                    _ => filename_from_url(&dep.url),
                };
                let mut request = HttpRequest::get(&dep.url).timeout(timeout);
                if dep.url_type == SourceKind::Civitai {
                    let token = self
                        .config
                        .bearer_token
                        .as_deref()
                        .filter(|t| !t.is_empty())
                        .ok_or(FetchError::MissingCredential("civitai bearer token"))?;
                    request = request.header("Authorization", format!("Bearer {token}"));
                }
                Ok(vec![(dep.url.clone(), request, dir.join(name))])
            }
            SourceKind::BackendLora => {
                let dest = dir.join(safe_basename(&dep.url)?);
                Ok(vec![(dep.url.clone(), self.backend_request(&dep.url), dest)])
            }
            SourceKind::BackendFiles => dep
                .files
                .iter()
                .map(|name| {
                    let dest = resolve_destination(dir, name)?;
                    let full = format!("{}{name}", dep.url);
                    let request = self.backend_request(&full);
                    Ok((full, request, dest))
                })
                .collect(),
        }
    }

    fn backend_request(&self, name: &str) -> HttpRequest {
        HttpRequest::post(&self.config.backend_download_url)
            .query(vec![
                ("token".into(), self.config.api_token.clone()),
                ("name".into(), name.to_string()),
            ])
            .timeout(self.config.request_timeout)
    }

    async fn already_present(&self, path: &Path) -> bool {
        match tokio::fs::metadata(path).await {
            Ok(meta) => meta.is_file() && meta.len() >= self.config.min_existing_size,
            Err(_) => false,
        }
    }
}

/// Name used when a URL path has no usable last segment.
const FALLBACK_FILE_NAME: &str = "download.bin";

/// Last path segment of a URL, ignoring query and fragment.
pub(crate) fn filename_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);
    path.split_once('/')
        .and_then(|(_, tail)| safe_basename(tail).ok())
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}
