use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One unit of work handed out by the job queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(deserialize_with = "crate::lenient::deserialize_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub workflow_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
}

impl Task {
    /// Task payload, or an empty map when the queue sent `null`.
    pub fn payload(&self) -> Map<String, Value> {
        self.payload.clone().unwrap_or_default()
    }
}

/// Response to a poll for the next task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetTaskResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
}

impl GetTaskResponse {
    /// The offered task, if the queue had one.
    pub fn into_task(self) -> Option<Task> {
        if self.success { self.task } else { None }
    }
}

/// Status values reported back to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// A status report for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub id: String,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub payload_update: Option<Value>,
}

impl TaskUpdate {
    pub fn new(id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            status,
            error_message: None,
            payload_update: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload_update = Some(payload);
        self
    }

    /// Form-encoded representation, without the auth token.
    ///
    /// `payload_update` travels as a JSON string.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("id".to_string(), self.id.clone()),
            ("status".to_string(), self.status.as_str().to_string()),
        ];
        if let Some(ref err) = self.error_message
            && !err.is_empty()
        {
            fields.push(("error_message".into(), err.clone()));
        }
        if let Some(ref payload) = self.payload_update {
            fields.push(("payload_update".into(), payload.to_string()));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_with_integer_id_and_null_payload() {
        let json = r#"{"id": 12, "type": "wan_video", "workflow_key": "wan", "payload": null}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.id, "12");
        assert_eq!(task.kind, "wan_video");
        assert!(task.payload().is_empty());
    }

    #[test]
    fn unsuccessful_poll_yields_no_task() {
        let json = r#"{"success": false, "task": {"id": "1", "type": "other"}}"#;
        let resp: GetTaskResponse = serde_json::from_str(json).unwrap();
        assert!(resp.into_task().is_none());
    }

    #[test]
    fn update_form_encodes_payload_as_json() {
        let update = TaskUpdate::new("5", TaskStatus::Done)
            .with_payload(serde_json::json!({"result_path": "/r/a.png"}));
        let fields = update.form_fields();
        assert_eq!(fields[1], ("status".into(), "done".into()));
        let payload = &fields.iter().find(|(k, _)| k == "payload_update").unwrap().1;
        let parsed: Value = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed["result_path"], "/r/a.png");
    }

    #[test]
    fn update_form_skips_empty_error() {
        let update = TaskUpdate::new("5", TaskStatus::Failed).with_error("");
        assert!(update.form_fields().iter().all(|(k, _)| k != "error_message"));
    }
}
