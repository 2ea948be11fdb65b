use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{ChannelError, ErrorClass, classify_status};
use crate::DIAGNOSTIC_BODY_LIMIT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A file attached to a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
    /// Raw bytes sent as `application/octet-stream`.
    Bytes(Vec<u8>),
    Multipart {
        fields: Vec<(String, String)>,
        file: FilePart,
    },
}

/// A transport-independent HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    /// Per-request timeout; `None` uses the channel default.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout: None,
        }
    }

    pub fn query(mut self, params: Vec<(String, String)>) -> Self {
        self.query.extend(params);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(fields);
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    pub fn bytes(mut self, data: Vec<u8>) -> Self {
        self.body = RequestBody::Bytes(data);
        self
    }

    pub fn multipart(mut self, fields: Vec<(String, String)>, file: FilePart) -> Self {
        self.body = RequestBody::Multipart { fields, file };
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Looks up a query parameter by name.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Looks up a form field by name.
    pub fn form_field(&self, name: &str) -> Option<&str> {
        let fields = match &self.body {
            RequestBody::Form(fields) => fields,
            RequestBody::Multipart { fields, .. } => fields,
            _ => return None,
        };
        fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json_body(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    /// `None` on success, otherwise the failure class of the status code.
    pub fn class(&self) -> Option<ErrorClass> {
        classify_status(self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ChannelError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ChannelError::Decode(format!("{e} (body: {})", self.snippet()))
        })
    }

    /// A short, lossy text excerpt of the body for error messages.
    pub fn snippet(&self) -> String {
        truncate_lossy(&self.body)
    }
}

/// Result of streaming a response body into a file.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadResponse {
    pub status: u16,
    /// Bytes written to the destination. Zero for a non-2xx status.
    pub bytes_written: u64,
    /// Body excerpt when the status was not 2xx.
    pub error_body: String,
}

impl DownloadResponse {
    pub fn class(&self) -> Option<ErrorClass> {
        classify_status(self.status)
    }
}

pub(crate) fn truncate_lossy(body: &[u8]) -> String {
    let end = body.len().min(DIAGNOSTIC_BODY_LIMIT);
    String::from_utf8_lossy(&body[..end]).into_owned()
}
