use serde::{Deserialize, Serialize};

use crate::STATUS_OK;

// ---------------------------------------------------------------------------
// Resource identity
// ---------------------------------------------------------------------------

/// Names one remote object in the backend store.
///
/// Sent as form fields on init/final and as query parameters on chunk calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub task_id: String,
    pub file_name: String,
}

impl ResourceId {
    pub fn new(task_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            file_name: file_name.into(),
        }
    }

    /// Query parameters for a chunk starting at `offset`.
    pub fn chunk_query(&self, offset: u64) -> Vec<(String, String)> {
        vec![
            ("task_id".into(), self.task_id.clone()),
            ("file_name".into(), self.file_name.clone()),
            ("offset".into(), offset.to_string()),
        ]
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.task_id, self.file_name)
    }
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens (or resumes) an upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitUploadRequest {
    #[serde(flatten)]
    pub resource: ResourceId,
    #[serde(with = "crate::lenient")]
    pub total_size: u64,
    pub sha256: String,
}

/// Closes an upload session. Same fields as init.
pub type FinalizeRequest = InitUploadRequest;

impl InitUploadRequest {
    /// Form-encoded representation.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        vec![
            ("task_id".into(), self.resource.task_id.clone()),
            ("file_name".into(), self.resource.file_name.clone()),
            ("total_size".into(), self.total_size.to_string()),
            ("sha256".into(), self.sha256.clone()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Response to init and to an accepted chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadAck {
    pub status: String,
    #[serde(default, with = "crate::lenient")]
    pub uploaded_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UploadAck {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Body of an HTTP 409 on a chunk call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetConflict {
    #[serde(with = "crate::lenient")]
    pub expected_offset: u64,
}

/// Response to finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub status: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, with = "crate::lenient")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FinalizeResponse {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Response to a single-shot multipart upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WholeUploadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_request_flattens_resource() {
        let req = InitUploadRequest {
            resource: ResourceId::new("42", "out.mp4"),
            total_size: 10,
            sha256: "ab".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["task_id"], "42");
        assert_eq!(json["file_name"], "out.mp4");
        assert_eq!(json["total_size"], 10);
    }

    #[test]
    fn init_form_fields_are_strings() {
        let req = InitUploadRequest {
            resource: ResourceId::new("7", "a.bin"),
            total_size: 2048,
            sha256: "ff".into(),
        };
        let fields = req.form_fields();
        assert!(fields.contains(&("total_size".into(), "2048".into())));
        assert!(fields.contains(&("task_id".into(), "7".into())));
    }

    #[test]
    fn chunk_query_carries_offset() {
        let q = ResourceId::new("7", "a.bin").chunk_query(4096);
        assert_eq!(q[2], ("offset".into(), "4096".into()));
    }

    #[test]
    fn ack_accepts_string_offset() {
        let ack: UploadAck =
            serde_json::from_str(r#"{"status":"ok","uploaded_bytes":"2097152"}"#).unwrap();
        assert!(ack.is_ok());
        assert_eq!(ack.uploaded_bytes, 2_097_152);
    }

    #[test]
    fn ack_error_status() {
        let ack: UploadAck =
            serde_json::from_str(r#"{"status":"error","message":"bad hash"}"#).unwrap();
        assert!(!ack.is_ok());
        assert_eq!(ack.uploaded_bytes, 0);
        assert_eq!(ack.message.as_deref(), Some("bad hash"));
    }

    #[test]
    fn finalize_response_defaults() {
        let resp: FinalizeResponse =
            serde_json::from_str(r#"{"status":"ok","path":"/store/a.bin","size":10}"#).unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.path, "/store/a.bin");
        assert_eq!(resp.size, 10);
    }

    #[test]
    fn whole_upload_missing_path() {
        let resp: WholeUploadResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.result_path.is_none());
    }
}
