use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use genworker_http::{ChannelError, Deadline, HttpChannel, RetryPolicy};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::job::{FailedFetch, FetchJob, FetchReport, JobOutcome};
use crate::{FetchError, PART_SUFFIX};

type Queue = Mutex<VecDeque<(usize, FetchJob)>>;
type Finished = Mutex<Vec<(usize, FetchJob)>>;

/// Runs batches of [`FetchJob`]s on a bounded set of workers.
///
/// `connect` is called once per worker; the channel it returns serves every
/// job that worker picks up and is never handed to another worker.
pub struct FetchPool<F> {
    connect: Arc<F>,
    backoff: RetryPolicy,
}

impl<F, C> FetchPool<F>
where
    F: Fn() -> Result<C, ChannelError> + Send + Sync + 'static,
    C: HttpChannel + 'static,
{
    /// `backoff` supplies the delays between attempts; the attempt limit is
    /// given per batch.
    pub fn new(connect: F, backoff: RetryPolicy) -> Self {
        Self {
            connect: Arc::new(connect),
            backoff,
        }
    }

    /// Downloads every job and reports each one exactly once.
    ///
    /// Never fails as a whole: exhausted retries, fatal statuses, lost
    /// workers and channel setup failures all become entries in
    /// [`FetchReport::failed`]. Once `deadline` passes no job or attempt is
    /// started; whatever is left fails with [`FetchError::DeadlineExceeded`].
    /// A download already in flight is bounded by its request timeout,
    /// which is shortened to the time left.
    pub async fn fetch_all(
        &self,
        jobs: Vec<FetchJob>,
        max_workers: usize,
        max_attempts: u32,
        deadline: Deadline,
    ) -> FetchReport {
        let total = jobs.len();
        if total == 0 {
            return FetchReport::default();
        }

        let ledger: Vec<(String, PathBuf)> = jobs
            .iter()
            .map(|j| (j.source().to_string(), j.destination().to_path_buf()))
            .collect();
        let queue: Arc<Queue> = Arc::new(Mutex::new(jobs.into_iter().enumerate().collect()));
        let finished: Arc<Finished> = Arc::new(Mutex::new(Vec::with_capacity(total)));
        let policy = RetryPolicy {
            max_attempts: max_attempts.max(1),
            ..self.backoff
        };
        let workers = max_workers.clamp(1, total);
        info!(jobs = total, workers, max_attempts = policy.max_attempts, "fetch batch started");

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let connect = Arc::clone(&self.connect);
            let queue = Arc::clone(&queue);
            let finished = Arc::clone(&finished);
            set.spawn(async move {
                let channel = match connect() {
                    Ok(channel) => channel,
                    Err(e) => {
                        warn!(worker, error = %e, "fetch worker could not open a channel");
                        return Some(e.to_string());
                    }
                };
                run_worker(worker, channel, &queue, &finished, policy, deadline).await;
                None
            });
        }

        let mut connect_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(e)) => connect_error = Some(e),
                Ok(None) => {}
                Err(e) => error!(error = %e, "fetch worker terminated abnormally"),
            }
        }

        let mut slots: Vec<Option<FetchJob>> = (0..total).map(|_| None).collect();
        for (idx, job) in lock(&*finished).drain(..) {
            slots[idx] = Some(job);
        }
        let expired = deadline.is_expired();
        for (idx, mut job) in lock(&*queue).drain(..) {
            let error = if expired {
                FetchError::DeadlineExceeded { attempts: 0 }
            } else {
                let reason = match &connect_error {
                    Some(e) => format!("{}: no worker channel ({e})", job.source()),
                    None => job.source().to_string(),
                };
                FetchError::WorkerLost(reason)
            };
            job.settle(JobOutcome::Failed(error));
            slots[idx] = Some(job);
        }

        let mut report = FetchReport::default();
        for (slot, (source, destination)) in slots.into_iter().zip(ledger) {
            match slot {
                Some(job) => report.record(job),
                None => report.failed.push(FailedFetch {
                    error: FetchError::WorkerLost(source.clone()),
                    source,
                    destination,
                    attempts: 0,
                }),
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "fetch batch finished"
        );
        report
    }
}

async fn run_worker<C: HttpChannel>(
    worker: usize,
    channel: C,
    queue: &Queue,
    finished: &Finished,
    policy: RetryPolicy,
    deadline: Deadline,
) {
    while !deadline.is_expired() {
        let Some((idx, mut job)) = next_job(queue) else {
            debug!(worker, "fetch worker drained queue");
            return;
        };
        run_job(worker, &channel, &mut job, policy, &deadline).await;
        lock(finished).push((idx, job));
    }
    warn!(worker, "fetch deadline passed, worker stopping");
}

fn next_job(queue: &Queue) -> Option<(usize, FetchJob)> {
    lock(queue).pop_front()
}

async fn run_job<C: HttpChannel>(
    worker: usize,
    channel: &C,
    job: &mut FetchJob,
    policy: RetryPolicy,
    deadline: &Deadline,
) {
    loop {
        let attempt = job.begin_attempt();
        match download_once(channel, job, deadline).await {
            Ok(bytes) => {
                info!(worker, source = job.source(), bytes, attempt, "fetched");
                let dest = job.destination().to_path_buf();
                job.settle(JobOutcome::Ok(dest));
                return;
            }
            Err(e) if e.is_transient() && policy.allows_another(attempt) => {
                let delay = policy.delay_for_retry(attempt);
                warn!(
                    worker,
                    source = job.source(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "fetch failed, retrying"
                );
                if !deadline.sleep(delay).await {
                    warn!(worker, source = job.source(), attempt, "fetch deadline passed");
                    job.settle(JobOutcome::Failed(FetchError::DeadlineExceeded {
                        attempts: attempt,
                    }));
                    return;
                }
            }
            Err(e) => {
                let error = if e.is_transient() {
                    FetchError::ExhaustedRetries {
                        attempts: attempt,
                        last: Box::new(e),
                    }
                } else {
                    e
                };
                warn!(worker, source = job.source(), attempt, error = %error, "fetch failed");
                job.settle(JobOutcome::Failed(error));
                return;
            }
        }
    }
}

/// Streams into `<dest>.part` and renames into place on a 2xx.
async fn download_once<C: HttpChannel>(
    channel: &C,
    job: &FetchJob,
    deadline: &Deadline,
) -> Result<u64, FetchError> {
    let dest = job.destination();
    if let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut request = job.request().clone();
    if let Some(left) = deadline.remaining() {
        request.timeout = Some(request.timeout.map_or(left, |t| t.min(left)));
    }

    let part = part_path(dest);
    let response = match channel.download(request, &part).await {
        Ok(response) => response,
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e.into());
        }
    };

    if response.class().is_some() {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(FetchError::Status {
            status: response.status,
            body: response.error_body,
        });
    }

    tokio::fs::rename(&part, dest).await?;
    Ok(response.bytes_written)
}

pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".");
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use genworker_http::{ChannelFuture, DownloadResponse, HttpRequest, HttpResponse};
    use tempfile::TempDir;

    #[derive(Clone)]
    enum Behavior {
        Serve(Vec<u8>),
        FailThenServe { failures: u32, body: Vec<u8> },
        AlwaysStatus(u16),
        TimeoutThenServe(Vec<u8>),
    }

    #[derive(Default)]
    struct FakeServer {
        routes: HashMap<String, Behavior>,
        calls: Mutex<HashMap<String, u32>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeServer {
        fn with_routes(routes: HashMap<String, Behavior>) -> Self {
            Self {
                routes,
                ..Default::default()
            }
        }

        fn calls_to(&self, url: &str) -> u32 {
            self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    impl HttpChannel for FakeServer {
        fn send(&self, _request: HttpRequest) -> ChannelFuture<'_, HttpResponse> {
            Box::pin(async { Err(ChannelError::InvalidRequest("send not scripted".into())) })
        }

        fn download<'a>(
            &'a self,
            request: HttpRequest,
            dest: &'a Path,
        ) -> ChannelFuture<'a, DownloadResponse> {
            Box::pin(async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);

                let call = {
                    let mut calls = self.calls.lock().unwrap();
                    let n = calls.entry(request.url.clone()).or_insert(0);
                    *n += 1;
                    *n
                };
                let body = match self.routes.get(&request.url).cloned() {
                    None => return Ok(status(404)),
                    Some(Behavior::Serve(body)) => body,
                    Some(Behavior::AlwaysStatus(code)) => return Ok(status(code)),
                    Some(Behavior::FailThenServe { failures, body }) => {
                        if call <= failures {
                            return Ok(status(503));
                        }
                        body
                    }
                    Some(Behavior::TimeoutThenServe(body)) => {
                        if call == 1 {
                            return Err(ChannelError::Timeout("read".into()));
                        }
                        body
                    }
                };
                tokio::fs::write(dest, &body).await?;
                Ok(DownloadResponse {
                    status: 200,
                    bytes_written: body.len() as u64,
                    error_body: String::new(),
                })
            })
        }
    }

    fn status(code: u16) -> DownloadResponse {
        DownloadResponse {
            status: code,
            bytes_written: 0,
            error_body: format!("status {code}"),
        }
    }

    struct Harness {
        server: Arc<FakeServer>,
        connects: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(routes: HashMap<String, Behavior>) -> Self {
            Self {
                server: Arc::new(FakeServer::with_routes(routes)),
                connects: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn pool(
            &self,
        ) -> FetchPool<impl Fn() -> Result<Arc<FakeServer>, ChannelError> + Send + Sync + 'static>
        {
            self.pool_with(RetryPolicy::immediate(1))
        }

        fn pool_with(
            &self,
            backoff: RetryPolicy,
        ) -> FetchPool<impl Fn() -> Result<Arc<FakeServer>, ChannelError> + Send + Sync + 'static>
        {
            let server = Arc::clone(&self.server);
            let connects = Arc::clone(&self.connects);
            FetchPool::new(
                move || {
                    connects.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::clone(&server))
                },
                backoff,
            )
        }
    }

    fn url(i: usize) -> String {
        format!("mem://files/{i}")
    }

    fn jobs(dir: &Path, n: usize) -> Vec<FetchJob> {
        (0..n)
            .map(|i| {
                FetchJob::new(
                    format!("file-{i}"),
                    HttpRequest::get(url(i)),
                    dir.join("nested").join(format!("{i}.bin")),
                )
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_partitioned_exactly() {
        let dir = TempDir::new().unwrap();
        let n = 12;
        let routes = (0..n)
            .map(|i| {
                let behavior = if i % 3 == 0 {
                    Behavior::AlwaysStatus(503)
                } else {
                    Behavior::FailThenServe {
                        failures: 1,
                        body: format!("payload {i}").into_bytes(),
                    }
                };
                (url(i), behavior)
            })
            .collect();
        let harness = Harness::new(routes);

        let report = harness.pool().fetch_all(jobs(dir.path(), n), 4, 3, Deadline::none()).await;

        let expected_ok: Vec<PathBuf> = (0..n)
            .filter(|i| i % 3 != 0)
            .map(|i| dir.path().join("nested").join(format!("{i}.bin")))
            .collect();
        let expected_failed: Vec<String> =
            (0..n).filter(|i| i % 3 == 0).map(|i| format!("file-{i}")).collect();
        assert_eq!(report.succeeded, expected_ok);
        assert_eq!(report.failed_sources(), expected_failed);
        assert_eq!(report.total(), n);

        for f in &report.failed {
            assert_eq!(f.attempts, 3);
            assert!(matches!(
                f.error,
                FetchError::ExhaustedRetries { attempts: 3, .. }
            ));
            assert!(!f.destination.exists());
        }
        for (i, path) in (0..n).filter(|i| i % 3 != 0).zip(&report.succeeded) {
            assert_eq!(std::fs::read(path).unwrap(), format!("payload {i}").into_bytes());
            assert!(!part_path(path).exists());
            assert_eq!(harness.server.calls_to(&url(i)), 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_channel_per_worker_and_bounded_concurrency() {
        let dir = TempDir::new().unwrap();
        let n = 20;
        let routes = (0..n).map(|i| (url(i), Behavior::Serve(vec![i as u8; 8]))).collect();
        let harness = Harness::new(routes);

        let report = harness.pool().fetch_all(jobs(dir.path(), n), 3, 2, Deadline::none()).await;

        assert!(report.is_complete());
        assert_eq!(harness.connects.load(Ordering::SeqCst), 3);
        let peak = harness.server.max_in_flight.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak concurrency {peak}");
    }

    #[tokio::test(start_paused = true)]
    async fn fewer_jobs_than_workers_opens_fewer_channels() {
        let dir = TempDir::new().unwrap();
        let routes = (0..2).map(|i| (url(i), Behavior::Serve(vec![1]))).collect();
        let harness = Harness::new(routes);

        let report = harness.pool().fetch_all(jobs(dir.path(), 2), 16, 1, Deadline::none()).await;
        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(harness.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_status_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let routes = HashMap::from([(url(0), Behavior::AlwaysStatus(404))]);
        let harness = Harness::new(routes);

        let report = harness.pool().fetch_all(jobs(dir.path(), 1), 2, 5, Deadline::none()).await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].attempts, 1);
        assert!(matches!(
            report.failed[0].error,
            FetchError::Status { status: 404, .. }
        ));
        assert_eq!(harness.server.calls_to(&url(0)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_timeout_is_retried() {
        let dir = TempDir::new().unwrap();
        let routes = HashMap::from([(url(0), Behavior::TimeoutThenServe(b"late".to_vec()))]);
        let harness = Harness::new(routes);

        let report = harness.pool().fetch_all(jobs(dir.path(), 1), 1, 2, Deadline::none()).await;
        assert!(report.is_complete());
        assert_eq!(std::fs::read(&report.succeeded[0]).unwrap(), b"late");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_tries_once() {
        let dir = TempDir::new().unwrap();
        let routes = HashMap::from([(url(0), Behavior::AlwaysStatus(503))]);
        let harness = Harness::new(routes);

        let report = harness.pool().fetch_all(jobs(dir.path(), 1), 1, 0, Deadline::none()).await;
        assert_eq!(report.failed[0].attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_new_attempts_and_jobs() {
        let dir = TempDir::new().unwrap();
        let routes = (0..3).map(|i| (url(i), Behavior::AlwaysStatus(503))).collect();
        let harness = Harness::new(routes);
        let backoff = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            jitter: Duration::ZERO,
        };

        let started = tokio::time::Instant::now();
        let report = harness
            .pool_with(backoff)
            .fetch_all(jobs(dir.path(), 3), 1, 5, Deadline::after(Some(Duration::from_secs(15))))
            .await;

        assert!(started.elapsed() < Duration::from_secs(16));
        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed_sources(), vec!["file-0", "file-1", "file-2"]);
        let attempts: Vec<u32> = report.failed.iter().map(|f| f.attempts).collect();
        assert_eq!(attempts, vec![2, 0, 0]);
        assert!(matches!(
            report.failed[0].error,
            FetchError::DeadlineExceeded { attempts: 2 }
        ));
        for f in &report.failed[1..] {
            assert!(matches!(f.error, FetchError::DeadlineExceeded { attempts: 0 }));
        }
        assert_eq!(harness.server.calls_to(&url(0)), 2);
        assert_eq!(harness.server.calls_to(&url(1)), 0);
    }

    #[tokio::test]
    async fn channel_setup_failure_fails_every_job() {
        let dir = TempDir::new().unwrap();
        let pool = FetchPool::new(
            || Err::<Arc<FakeServer>, _>(ChannelError::InvalidRequest("no tls".into())),
            RetryPolicy::immediate(1),
        );

        let report = pool.fetch_all(jobs(dir.path(), 3), 2, 3, Deadline::none()).await;
        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed.len(), 3);
        for f in &report.failed {
            assert_eq!(f.attempts, 0);
            match &f.error {
                FetchError::WorkerLost(reason) => assert!(reason.contains("no tls")),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn empty_batch_is_empty_report() {
        let harness = Harness::new(HashMap::new());
        let report = harness.pool().fetch_all(Vec::new(), 4, 3, Deadline::none()).await;
        assert_eq!(report.total(), 0);
        assert_eq!(harness.connects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/models/loras/a.safetensors")),
            PathBuf::from("/models/loras/a.safetensors.part")
        );
    }
}
