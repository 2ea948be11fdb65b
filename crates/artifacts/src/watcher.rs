use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tracing::{debug, info};

use crate::{FsView, StructureValidator, ValidationError, WatchError};

/// Polling and acceptance parameters for one kind of artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchConfig {
    pub poll_interval: Duration,
    /// Gap between the two size readings of the stability check.
    pub settle_interval: Duration,
    /// Files smaller than this are never candidates.
    pub min_size: u64,
    pub timeout: Duration,
    /// Newest-match accepts files modified up to this long before the start.
    pub mtime_slack: Duration,
    /// Lowercase extensions whose files must also pass the validator.
    pub validate_extensions: Vec<String>,
}

impl WatchConfig {
    /// A single rendered video.
    pub fn single_output() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            settle_interval: Duration::from_secs(2),
            min_size: 1_000_000,
            timeout: Duration::from_secs(900),
            mtime_slack: Duration::from_secs(2),
            validate_extensions: vec!["mp4".into()],
        }
    }

    /// A directory of video segments.
    pub fn segments() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            settle_interval: Duration::from_secs(4),
            min_size: 200_000,
            timeout: Duration::from_secs(1800),
            mtime_slack: Duration::from_secs(2),
            validate_extensions: vec!["mp4".into()],
        }
    }

    pub fn requires_validation(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.validate_extensions
                    .iter()
                    .any(|v| v.eq_ignore_ascii_case(ext))
            })
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::single_output()
    }
}

/// A file observed during one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCandidate {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    /// Set once the structural validator passed.
    pub validated: bool,
}

/// Waits for externally written files to be complete.
pub struct ArtifactWatcher<F, V> {
    fs: F,
    validator: V,
    config: WatchConfig,
}

impl<F: FsView, V: StructureValidator> ArtifactWatcher<F, V> {
    pub fn new(fs: F, validator: V, config: WatchConfig) -> Self {
        Self {
            fs,
            validator,
            config,
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Returns the newest stable file matching any selector and modified at
    /// or after `started_at - mtime_slack`.
    ///
    /// Only the newest sufficiently large candidate is considered on each
    /// poll; a newer file appearing later replaces it.
    pub async fn wait_newest(
        &self,
        selectors: &[String],
        started_at: SystemTime,
    ) -> Result<ArtifactCandidate, WatchError> {
        let deadline = Instant::now() + self.config.timeout;
        let threshold = started_at
            .checked_sub(self.config.mtime_slack)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut best = Vec::new();
        loop {
            let fresh: Vec<ArtifactCandidate> = self
                .observe(selectors)?
                .into_iter()
                .filter(|c| c.modified >= threshold)
                .collect();
            remember(&mut best, &fresh);

            if let Some(newest) = fresh.iter().rev().find(|c| c.size >= self.config.min_size)
                && let Some(accepted) = self.prove(newest).await?
            {
                info!(path = %accepted.path.display(), size = accepted.size, "artifact ready");
                return Ok(accepted);
            }

            if !self.pause(deadline).await {
                return Err(WatchError::Timeout {
                    selector: selectors.join(", "),
                    waited: self.config.timeout,
                    last_seen: best,
                });
            }
        }
    }

    /// Returns every sufficiently large file matching `selector`, oldest
    /// first, once the newest of them is stable.
    pub async fn wait_set(&self, selector: &str) -> Result<Vec<ArtifactCandidate>, WatchError> {
        let deadline = Instant::now() + self.config.timeout;
        let selectors = [selector.to_string()];

        let mut best = Vec::new();
        loop {
            let seen = self.observe(&selectors)?;
            remember(&mut best, &seen);
            let mut big: Vec<ArtifactCandidate> = seen
                .iter()
                .filter(|c| c.size >= self.config.min_size)
                .cloned()
                .collect();

            if let Some(newest) = big.last()
                && let Some(accepted) = self.prove(newest).await?
            {
                if let Some(last) = big.last_mut() {
                    *last = accepted;
                }
                info!(selector, count = big.len(), "artifact set ready");
                return Ok(big);
            }

            if !self.pause(deadline).await {
                return Err(WatchError::Timeout {
                    selector: selector.to_string(),
                    waited: self.config.timeout,
                    last_seen: best,
                });
            }
        }
    }

    /// Regular files matching any selector, deduplicated, oldest first.
    fn observe(&self, selectors: &[String]) -> Result<Vec<ArtifactCandidate>, WatchError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for pattern in selectors {
            for path in self.fs.matches(pattern)? {
                if !seen.insert(path.clone()) {
                    continue;
                }
                match self.fs.stat(&path) {
                    Ok(stat) if stat.is_file => out.push(ArtifactCandidate {
                        path,
                        size: stat.size,
                        modified: stat.modified,
                        validated: false,
                    }),
                    Ok(_) => {}
                    Err(e) => debug!(path = %path.display(), error = %e, "candidate vanished"),
                }
            }
        }
        out.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        Ok(out)
    }

    /// Two size readings one settle interval apart, then validation.
    ///
    /// `Ok(None)` means "not yet"; only a validator that cannot run at all
    /// is an error.
    async fn prove(
        &self,
        candidate: &ArtifactCandidate,
    ) -> Result<Option<ArtifactCandidate>, WatchError> {
        let path = &candidate.path;
        let Ok(before) = self.fs.stat(path) else {
            return Ok(None);
        };
        tokio::time::sleep(self.config.settle_interval).await;
        let Ok(after) = self.fs.stat(path) else {
            return Ok(None);
        };

        if before.size != after.size {
            debug!(path = %path.display(), before = before.size, after = after.size, "still growing");
            return Ok(None);
        }
        if after.size < self.config.min_size {
            return Ok(None);
        }

        let mut accepted = ArtifactCandidate {
            path: path.clone(),
            size: after.size,
            modified: after.modified,
            validated: false,
        };
        if self.config.requires_validation(path) {
            match self.validator.validate(path).await {
                Ok(()) => accepted.validated = true,
                Err(e @ ValidationError::Spawn { .. }) => return Err(e.into()),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "stable but not yet valid");
                    return Ok(None);
                }
            }
        }
        Ok(Some(accepted))
    }

    /// Sleeps one poll interval, clamped to the deadline. `false` once the
    /// deadline has passed.
    async fn pause(&self, deadline: Instant) -> bool {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        true
    }
}

/// Keeps the latest non-empty listing for the timeout report.
fn remember(best: &mut Vec<PathBuf>, listing: &[ArtifactCandidate]) {
    if !listing.is_empty() {
        *best = listing.iter().map(|c| c.path.clone()).collect();
    }
}
