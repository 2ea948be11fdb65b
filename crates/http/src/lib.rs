//! HTTP plumbing shared by the upload and download paths.
//!
//! [`HttpChannel`] is the seam between protocol logic and the network.
//! [`ReqwestChannel`] is the production implementation; tests substitute
//! in-memory fakes.

mod channel;
mod error;
mod reqwest_channel;
mod request;
mod retry;

pub use channel::{ChannelFuture, HttpChannel};
pub use error::{ChannelError, ErrorClass, classify_status};
pub use reqwest_channel::{ChannelConfig, ReqwestChannel};
pub use request::{
    DownloadResponse, FilePart, HttpRequest, HttpResponse, Method, RequestBody,
};
pub use retry::{Deadline, RetryPolicy};

use std::time::Duration;

/// Timeout for establishing a TCP/TLS connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum number of response-body bytes kept for diagnostics.
pub const DIAGNOSTIC_BODY_LIMIT: usize = 512;
