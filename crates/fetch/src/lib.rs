//! Bounded-concurrency downloads.
//!
//! [`FetchPool`] drains a queue of [`FetchJob`]s with a fixed number of
//! workers. Each worker owns one channel for its whole lifetime. Every job
//! ends in the returned [`FetchReport`]; a failed job never aborts the batch.

mod error;
mod installer;
mod job;
mod pool;
mod validation;

pub use error::FetchError;
pub use installer::{DependencyInstaller, InstallerConfig};
pub use job::{FailedFetch, FetchJob, FetchReport, JobOutcome};
pub use pool::FetchPool;
pub use validation::{resolve_destination, safe_basename};

/// Default number of concurrent download workers.
pub const DEFAULT_MAX_WORKERS: usize = 16;

/// Default attempts per job, counting the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Suffix of the temporary file a download streams into.
pub const PART_SUFFIX: &str = "part";
