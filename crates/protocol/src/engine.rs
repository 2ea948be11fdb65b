use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A job submitted to the generation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSubmission {
    pub prompt: Value,
    pub client_id: String,
}

/// The engine's response to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResult {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub images: Vec<EngineImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
}

/// An inline image returned by the engine.
///
/// Either a bare base64 string or an object carrying the data under
/// `image` or `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EngineImage {
    Encoded(String),
    Object {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

impl EngineImage {
    /// The base64 payload, if any.
    pub fn encoded(&self) -> Option<&str> {
        match self {
            Self::Encoded(s) => Some(s.as_str()).filter(|s| !s.is_empty()),
            Self::Object { image, data, .. } => image
                .as_deref()
                .filter(|s| !s.is_empty())
                .or(data.as_deref().filter(|s| !s.is_empty())),
        }
    }

    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::Encoded(_) => None,
            Self::Object { filename, .. } => filename.as_deref(),
        }
    }

    /// Decodes the payload. `None` when the image carries no data.
    pub fn decode(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        self.encoded().map(|s| STANDARD.decode(s.trim()))
    }
}
