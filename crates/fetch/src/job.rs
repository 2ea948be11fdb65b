use std::path::{Path, PathBuf};

use genworker_http::HttpRequest;

use crate::FetchError;

/// Terminal state of a [`FetchJob`].
#[derive(Debug)]
pub enum JobOutcome {
    Pending,
    Ok(PathBuf),
    Failed(FetchError),
}

/// One remote resource to be streamed into a local file.
#[derive(Debug)]
pub struct FetchJob {
    source: String,
    request: HttpRequest,
    destination: PathBuf,
    attempts: u32,
    outcome: JobOutcome,
}

impl FetchJob {
    /// `source` names the resource in reports; `request` is replayed on
    /// every attempt.
    pub fn new(
        source: impl Into<String>,
        request: HttpRequest,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: source.into(),
            request,
            destination: destination.into(),
            attempts: 0,
            outcome: JobOutcome::Pending,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn outcome(&self) -> &JobOutcome {
        &self.outcome
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.outcome, JobOutcome::Pending)
    }

    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Moves the job out of `Pending`. A settled job ignores later calls.
    pub(crate) fn settle(&mut self, outcome: JobOutcome) -> bool {
        if !self.is_pending() || matches!(outcome, JobOutcome::Pending) {
            return false;
        }
        self.outcome = outcome;
        true
    }
}

/// A job that ended in failure.
#[derive(Debug)]
pub struct FailedFetch {
    pub source: String,
    pub destination: PathBuf,
    pub attempts: u32,
    pub error: FetchError,
}

/// Partition of a batch into succeeded and failed jobs, in submission order.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<FailedFetch>,
}

impl FetchReport {
    pub(crate) fn record(&mut self, job: FetchJob) {
        match job.outcome {
            JobOutcome::Ok(path) => self.succeeded.push(path),
            JobOutcome::Failed(error) => self.failed.push(FailedFetch {
                source: job.source,
                destination: job.destination,
                attempts: job.attempts,
                error,
            }),
            JobOutcome::Pending => self.failed.push(FailedFetch {
                error: FetchError::WorkerLost(job.source.clone()),
                source: job.source,
                destination: job.destination,
                attempts: job.attempts,
            }),
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_sources(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.source.clone()).collect()
    }

    /// Turns any failure into [`FetchError::Incomplete`].
    pub fn into_result(self) -> Result<Vec<PathBuf>, FetchError> {
        if self.is_complete() {
            Ok(self.succeeded)
        } else {
            Err(FetchError::Incomplete {
                total: self.total(),
                failed: self.failed_sources(),
            })
        }
    }
}
