use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ChannelError;
use crate::request::{DownloadResponse, HttpRequest, HttpResponse};

/// Boxed future returned by [`HttpChannel`] methods.
pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ChannelError>> + Send + 'a>>;

/// Abstract request/response channel to a remote HTTP endpoint.
///
/// Non-2xx statuses are returned as values, not errors, so callers can
/// classify them. `Err` is reserved for failures below the status line.
pub trait HttpChannel: Send + Sync {
    /// Sends a request and buffers the whole response body.
    fn send(&self, request: HttpRequest) -> ChannelFuture<'_, HttpResponse>;

    /// Sends a request and streams a 2xx response body into `dest`.
    ///
    /// `dest` is created or truncated only when the status is 2xx.
    fn download<'a>(
        &'a self,
        request: HttpRequest,
        dest: &'a Path,
    ) -> ChannelFuture<'a, DownloadResponse>;
}

impl<T: HttpChannel + ?Sized> HttpChannel for &T {
    fn send(&self, request: HttpRequest) -> ChannelFuture<'_, HttpResponse> {
        (**self).send(request)
    }

    fn download<'a>(
        &'a self,
        request: HttpRequest,
        dest: &'a Path,
    ) -> ChannelFuture<'a, DownloadResponse> {
        (**self).download(request, dest)
    }
}

impl<T: HttpChannel + ?Sized> HttpChannel for Arc<T> {
    fn send(&self, request: HttpRequest) -> ChannelFuture<'_, HttpResponse> {
        (**self).send(request)
    }

    fn download<'a>(
        &'a self,
        request: HttpRequest,
        dest: &'a Path,
    ) -> ChannelFuture<'a, DownloadResponse> {
        (**self).download(request, dest)
    }
}
