use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::channel::{ChannelFuture, HttpChannel};
use crate::error::ChannelError;
use crate::request::{
    DownloadResponse, HttpRequest, HttpResponse, Method, RequestBody, truncate_lossy,
};
use crate::CONNECT_TIMEOUT;

/// Settings for [`ReqwestChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub connect_timeout: Duration,
    /// Applied when a request carries no timeout of its own.
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: Duration::from_secs(120),
            user_agent: concat!("genworker/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

/// [`HttpChannel`] backed by a pooled `reqwest::Client`.
///
/// One instance owns one connection pool. Keep it for the lifetime of a
/// worker to reuse keep-alive connections.
pub struct ReqwestChannel {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl ReqwestChannel {
    pub fn new(config: &ChannelConfig) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ChannelError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            client,
            request_timeout: config.request_timeout,
        })
    }

    fn build(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder, ChannelError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = builder.timeout(request.timeout.unwrap_or(self.request_timeout));

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(fields) => builder.form(&fields),
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Bytes(data) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(data),
            RequestBody::Multipart { fields, file } => {
                let mut form = reqwest::multipart::Form::new();
                for (name, value) in fields {
                    form = form.text(name, value);
                }
                let part = reqwest::multipart::Part::bytes(file.data).file_name(file.file_name);
                builder.multipart(form.part(file.field, part))
            }
        };
        Ok(builder)
    }
}

impl HttpChannel for ReqwestChannel {
    fn send(&self, request: HttpRequest) -> ChannelFuture<'_, HttpResponse> {
        Box::pin(async move {
            let url = request.url.clone();
            let resp = self.build(request)?.send().await?;
            let status = resp.status().as_u16();
            let body = resp.bytes().await?.to_vec();
            debug!(%url, status, bytes = body.len(), "response received");
            Ok(HttpResponse { status, body })
        })
    }

    fn download<'a>(
        &'a self,
        request: HttpRequest,
        dest: &'a Path,
    ) -> ChannelFuture<'a, DownloadResponse> {
        Box::pin(async move {
            let resp = self.build(request)?.send().await?;
            let status = resp.status().as_u16();
            if !resp.status().is_success() {
                let body = resp.bytes().await.unwrap_or_default();
                return Ok(DownloadResponse {
                    status,
                    bytes_written: 0,
                    error_body: truncate_lossy(&body),
                });
            }

            let mut file = tokio::fs::File::create(dest).await?;
            let mut stream = resp.bytes_stream();
            let mut written: u64 = 0;
            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(b) => b,
                    Err(e) => {
                        drop(file);
                        let _ = tokio::fs::remove_file(dest).await;
                        return Err(e.into());
                    }
                };
                file.write_all(&bytes).await?;
                written += bytes.len() as u64;
            }
            file.flush().await?;
            file.sync_all().await?;

            debug!(dest = %dest.display(), bytes = written, "download complete");
            Ok(DownloadResponse {
                status,
                bytes_written: written,
                error_body: String::new(),
            })
        })
    }
}

impl From<reqwest::Error> for ChannelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() || e.is_body() {
            Self::Connect(e.to_string())
        } else if e.is_builder() {
            Self::InvalidRequest(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serves one canned HTTP/1.1 response on a loopback port.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut seen = Vec::new();
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
                if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            sock.write_all(response.as_bytes()).await.unwrap();
            sock.shutdown().await.unwrap();
        });
        format!("http://{addr}/file")
    }

    #[tokio::test]
    async fn send_returns_status_and_body() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy",
        )
        .await;
        let channel = ReqwestChannel::new(&ChannelConfig::default()).unwrap();
        let resp = channel.send(HttpRequest::get(url)).await.unwrap();
        assert_eq!(resp.status, 503);
        assert_eq!(resp.body, b"busy");
        assert_eq!(resp.class(), Some(ErrorClass::Transient));
    }

    #[tokio::test]
    async fn download_streams_to_file() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 11\r\nConnection: close\r\n\r\nhello world",
        )
        .await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.bin");
        let channel = ReqwestChannel::new(&ChannelConfig::default()).unwrap();
        let resp = channel.download(HttpRequest::get(url), &dest).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.bytes_written, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn download_error_status_writes_nothing() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 7\r\nConnection: close\r\n\r\nmissing",
        )
        .await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.bin");
        let channel = ReqwestChannel::new(&ChannelConfig::default()).unwrap();
        let resp = channel.download(HttpRequest::get(url), &dest).await.unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.error_body, "missing");
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel = ReqwestChannel::new(&ChannelConfig::default()).unwrap();
        let err = channel
            .send(HttpRequest::get(format!("http://{addr}/")))
            .await
            .unwrap_err();
        assert!(err.is_transient(), "{err}");
    }

    #[tokio::test]
    async fn malformed_url_is_fatal() {
        let channel = ReqwestChannel::new(&ChannelConfig::default()).unwrap();
        let err = channel.send(HttpRequest::get("not a url")).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Fatal, "{err}");
    }
}
