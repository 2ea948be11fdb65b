//! Three-phase upload client.
//!
//! ```text
//! init(resource, total_size, sha256)   -> uploaded_bytes (resume point)
//! chunk(resource, offset, bytes)       -> uploaded_bytes | 409 expected_offset
//! final(resource, total_size, sha256)  -> path, size
//! ```
//!
//! Chunks are strictly sequential: chunk N is acknowledged before chunk
//! N+1 is read. A 409 reseeks to the remote's offset and does not count
//! as a failed attempt.

use std::path::Path;
use std::time::Duration;

use genworker_http::{
    ChannelError, Deadline, ErrorClass, FilePart, HttpChannel, HttpRequest, HttpResponse,
    RetryPolicy,
};
use genworker_protocol::{
    AUTH_HEADER, FinalizeResponse, OffsetConflict, ResourceId, UploadAck, WholeUploadResponse,
};
use tracing::{debug, info, warn};

use crate::chunked::{ChunkReader, hash_file};
use crate::error::{Phase, TransferError};
use crate::session::TransferSession;
use crate::DEFAULT_CHUNK_SIZE;

/// Backend URLs for the upload protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadEndpoints {
    pub init: String,
    pub chunk: String,
    pub finalize: String,
    /// Single-shot multipart upload for small results.
    pub whole: String,
}

/// Upload tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferConfig {
    pub chunk_size: usize,
    /// Applied to init and to every chunk.
    pub retry: RetryPolicy,
    /// Reseeks allowed for one chunk before giving up.
    pub max_offset_conflicts: u32,
    /// Bound on a whole `transfer_one` call; `None` waits indefinitely.
    pub total_timeout: Option<Duration>,
    pub init_timeout: Duration,
    pub chunk_timeout: Duration,
    pub finalize_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::upload(),
            max_offset_conflicts: 16,
            total_timeout: None,
            init_timeout: Duration::from_secs(30),
            chunk_timeout: Duration::from_secs(120),
            finalize_timeout: Duration::from_secs(60),
        }
    }
}

/// The backend's confirmation of a complete object.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedUpload {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// Outcome of one HTTP exchange, sorted for the retry loop.
enum Exchange {
    Accepted(HttpResponse),
    Conflict(HttpResponse),
    Retry(TransferError),
    Abort(TransferError),
}

fn sort_exchange(phase: Phase, result: Result<HttpResponse, ChannelError>) -> Exchange {
    match result {
        Err(e) => match e.class() {
            ErrorClass::Transient => Exchange::Retry(TransferError::channel(phase, e)),
            _ => Exchange::Abort(TransferError::channel(phase, e)),
        },
        Ok(resp) => match resp.class() {
            None => Exchange::Accepted(resp),
            Some(ErrorClass::Conflict) => Exchange::Conflict(resp),
            Some(ErrorClass::Transient) => Exchange::Retry(status_error(phase, &resp)),
            Some(ErrorClass::Fatal) => Exchange::Abort(status_error(phase, &resp)),
        },
    }
}

fn status_error(phase: Phase, resp: &HttpResponse) -> TransferError {
    TransferError::Status {
        phase,
        status: resp.status,
        body: resp.snippet(),
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    phase: Phase,
    resp: &HttpResponse,
) -> Result<T, TransferError> {
    resp.json().map_err(|e| TransferError::channel(phase, e))
}

/// Uploads files to the backend store over an [`HttpChannel`].
pub struct TransferClient<C> {
    channel: C,
    endpoints: UploadEndpoints,
    auth_token: String,
    config: TransferConfig,
}

impl<C: HttpChannel> TransferClient<C> {
    pub fn new(
        channel: C,
        endpoints: UploadEndpoints,
        auth_token: impl Into<String>,
        config: TransferConfig,
    ) -> Self {
        Self {
            channel,
            endpoints,
            auth_token: auth_token.into(),
            config,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Uploads `path` as `resource`, resuming wherever the remote left off.
    pub async fn transfer_one(
        &self,
        path: &Path,
        resource: ResourceId,
    ) -> Result<FinalizedUpload, TransferError> {
        let deadline = Deadline::after(self.config.total_timeout);
        let total_size = tokio::fs::metadata(path).await?.len();
        let sha256 = hash_file(path).await?;
        let mut session = TransferSession::new(path, resource, total_size, sha256);

        let ack = self.init(&session, &deadline).await?;
        session.resume_at(ack.uploaded_bytes)?;
        info!(
            resource = %session.resource(),
            offset = session.confirmed(),
            total = total_size,
            "upload session opened"
        );

        let mut reader = ChunkReader::open(path, self.config.chunk_size).await?;
        if reader.file_size() != total_size {
            return Err(TransferError::FileChanged {
                path: path.to_path_buf(),
            });
        }

        while !session.is_complete() {
            self.send_next_chunk(&mut session, &mut reader, &deadline)
                .await?;
            debug!(
                resource = %session.resource(),
                offset = session.confirmed(),
                total = total_size,
                "chunk accepted"
            );
        }

        if deadline.is_expired() {
            return Err(TransferError::DeadlineExceeded {
                phase: Phase::Finalize,
            });
        }
        let done = self.finalize(&session).await?;
        info!(
            resource = %session.resource(),
            path = %done.path,
            size = done.size,
            "upload finalized"
        );
        Ok(done)
    }

    /// Init is idempotent on the remote, so it shares the chunk retry policy.
    async fn init(
        &self,
        session: &TransferSession,
        deadline: &Deadline,
    ) -> Result<UploadAck, TransferError> {
        let phase = Phase::Init;
        let mut failures = 0u32;
        loop {
            if deadline.is_expired() {
                return Err(TransferError::DeadlineExceeded { phase });
            }
            let request = HttpRequest::post(&self.endpoints.init)
                .header(AUTH_HEADER, &self.auth_token)
                .form(session.descriptor().form_fields())
                .timeout(self.config.init_timeout);

            let err = match sort_exchange(phase, self.channel.send(request).await) {
                Exchange::Accepted(resp) => {
                    let ack: UploadAck = decode(phase, &resp)?;
                    if !ack.is_ok() {
                        return Err(TransferError::Rejected {
                            phase,
                            message: ack.message.unwrap_or(ack.status),
                        });
                    }
                    return Ok(ack);
                }
                Exchange::Conflict(resp) => return Err(status_error(phase, &resp)),
                Exchange::Abort(e) => return Err(e),
                Exchange::Retry(e) => e,
            };
            failures += 1;
            self.back_off(phase, failures, err, deadline).await?;
        }
    }

    /// Sends the chunk at the confirmed offset until the remote accepts it.
    async fn send_next_chunk(
        &self,
        session: &mut TransferSession,
        reader: &mut ChunkReader,
        deadline: &Deadline,
    ) -> Result<(), TransferError> {
        let mut failures = 0u32;
        let mut conflicts = 0u32;
        let mut chunk = reader
            .chunk_at(session.confirmed())
            .await?
            .ok_or_else(|| TransferError::FileChanged {
                path: session.path().to_path_buf(),
            })?;

        loop {
            let phase = Phase::Chunk {
                offset: chunk.offset,
            };
            if deadline.is_expired() {
                return Err(TransferError::DeadlineExceeded { phase });
            }

            let request = HttpRequest::post(&self.endpoints.chunk)
                .header(AUTH_HEADER, &self.auth_token)
                .query(session.resource().chunk_query(chunk.offset))
                .bytes(chunk.data.clone())
                .timeout(self.config.chunk_timeout);

            let err = match sort_exchange(phase, self.channel.send(request).await) {
                Exchange::Accepted(resp) => {
                    let ack: UploadAck = decode(phase, &resp)?;
                    if !ack.is_ok() {
                        return Err(TransferError::Rejected {
                            phase,
                            message: ack.message.unwrap_or(ack.status),
                        });
                    }
                    return session.acknowledge(ack.uploaded_bytes);
                }
                Exchange::Conflict(resp) => {
                    let conflict: OffsetConflict = decode(phase, &resp)?;
                    conflicts += 1;
                    if conflicts > self.config.max_offset_conflicts {
                        return Err(TransferError::UnresolvedConflict {
                            offset: conflict.expected_offset,
                            conflicts: conflicts - 1,
                        });
                    }
                    warn!(
                        resource = %session.resource(),
                        sent = chunk.offset,
                        expected = conflict.expected_offset,
                        "offset conflict, reseeking"
                    );
                    session.reseek(conflict.expected_offset)?;
                    if session.is_complete() {
                        return Ok(());
                    }
                    chunk = reader
                        .chunk_at(session.confirmed())
                        .await?
                        .ok_or_else(|| TransferError::FileChanged {
                            path: session.path().to_path_buf(),
                        })?;
                    continue;
                }
                Exchange::Abort(e) => return Err(e),
                Exchange::Retry(e) => e,
            };
            failures += 1;
            self.back_off(phase, failures, err, deadline).await?;
        }
    }

    /// Finalize gets exactly one attempt.
    async fn finalize(&self, session: &TransferSession) -> Result<FinalizedUpload, TransferError> {
        let phase = Phase::Finalize;
        let request = HttpRequest::post(&self.endpoints.finalize)
            .header(AUTH_HEADER, &self.auth_token)
            .form(session.descriptor().form_fields())
            .timeout(self.config.finalize_timeout);

        let resp = match sort_exchange(phase, self.channel.send(request).await) {
            Exchange::Accepted(resp) => resp,
            Exchange::Conflict(resp) => return Err(status_error(phase, &resp)),
            Exchange::Retry(e) | Exchange::Abort(e) => return Err(e),
        };

        let done: FinalizeResponse = decode(phase, &resp)?;
        if !done.is_ok() {
            return Err(TransferError::Rejected {
                phase,
                message: done.message.unwrap_or(done.status),
            });
        }
        Ok(FinalizedUpload {
            path: done.path,
            size: done.size,
            sha256: session.sha256().to_string(),
        })
    }

    /// Sleeps before retry number `failures`, or converts `err` into the
    /// terminal error when no retry is left.
    async fn back_off(
        &self,
        phase: Phase,
        failures: u32,
        err: TransferError,
        deadline: &Deadline,
    ) -> Result<(), TransferError> {
        let policy = &self.config.retry;
        if !policy.allows_another(failures) {
            return Err(TransferError::ExhaustedRetries {
                phase,
                attempts: failures,
                last: Box::new(err),
            });
        }
        let delay = policy.delay_for_retry(failures);
        warn!(
            %phase,
            attempt = failures,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient upload failure, retrying"
        );
        if !deadline.sleep(delay).await {
            return Err(TransferError::DeadlineExceeded { phase });
        }
        Ok(())
    }

    /// Uploads a small file in one multipart request and returns the
    /// backend's `result_path`.
    pub async fn upload_whole(&self, path: &Path, task_id: &str) -> Result<String, TransferError> {
        let phase = Phase::Whole;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| TransferError::InvalidPath(path.display().to_string()))?
            .to_string();
        let data = tokio::fs::read(path).await?;
        let size = data.len();

        let fields = vec![
            ("token".to_string(), self.auth_token.clone()),
            ("task_id".to_string(), task_id.to_string()),
            ("file_name".to_string(), file_name.clone()),
        ];
        let request = HttpRequest::post(&self.endpoints.whole)
            .multipart(
                fields,
                FilePart {
                    field: "file".into(),
                    file_name,
                    data,
                },
            )
            .timeout(self.config.chunk_timeout);

        let resp = match sort_exchange(phase, self.channel.send(request).await) {
            Exchange::Accepted(resp) => resp,
            Exchange::Conflict(resp) => return Err(status_error(phase, &resp)),
            Exchange::Retry(e) | Exchange::Abort(e) => return Err(e),
        };
        let body: WholeUploadResponse = decode(phase, &resp)?;
        let result_path = body.result_path.ok_or_else(|| TransferError::Rejected {
            phase,
            message: format!("no result_path in response: {}", resp.snippet()),
        })?;
        info!(task_id, bytes = size, %result_path, "file uploaded");
        Ok(result_path)
    }
}
