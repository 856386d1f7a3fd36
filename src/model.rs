//! Wire and request models shared by both stream consumers.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Discriminator of a [`StreamEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Progress,
    AnswerChunk,
    TaskUpdate,
    Error,
    Done,
    Unknown,
}

impl EventKind {
    /// Parse the wire `type` tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "progress" => EventKind::Progress,
            "answer_chunk" => EventKind::AnswerChunk,
            "task_update" => EventKind::TaskUpdate,
            "error" => EventKind::Error,
            "done" => EventKind::Done,
            _ => EventKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Progress => "progress",
            EventKind::AnswerChunk => "answer_chunk",
            EventKind::TaskUpdate => "task_update",
            EventKind::Error => "error",
            EventKind::Done => "done",
            EventKind::Unknown => "unknown",
        }
    }
}

/// A decoded application-level event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Free-text status notification.
    Progress(String),

    /// Fragment of the answer, to be concatenated in arrival order.
    AnswerChunk(String),

    /// Status change of one agent task.
    TaskUpdate(TaskUpdate),

    /// Error reported by the server inside the stream.
    Error(String),

    /// Terminal marker of the logical stream. More bytes may still follow.
    Done,

    /// Event with an unrecognized `type`; carries the tag.
    Unknown(String),
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::Progress(_) => EventKind::Progress,
            StreamEvent::AnswerChunk(_) => EventKind::AnswerChunk,
            StreamEvent::TaskUpdate(_) => EventKind::TaskUpdate,
            StreamEvent::Error(_) => EventKind::Error,
            StreamEvent::Done => EventKind::Done,
            StreamEvent::Unknown(_) => EventKind::Unknown,
        }
    }
}

/// Lifecycle status of an agent task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    #[serde(other)]
    Other,
}

impl TaskStatus {
    /// Completed or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Structured content of a `task_update` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(deserialize_with = "string_or_number")]
    pub task_id: String,

    #[serde(default)]
    pub description: String,

    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskUpdate {
    /// Overlay the fields of a newer update for the same task.
    pub fn merge(&mut self, newer: TaskUpdate) {
        if !newer.description.is_empty() {
            self.description = newer.description;
        }
        self.status = newer.status;
        if newer.result.is_some() {
            self.result = newer.result;
        }
        if newer.tool.is_some() {
            self.tool = newer.tool;
        }
        if newer.error.is_some() {
            self.error = newer.error;
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number task_id, got {other}"
        ))),
    }
}

/// Body of a streaming RAG query.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueryRequest {
    /// Name of the RAG to query
    pub rag_name: String,

    /// The user question
    pub prompt: String,

    /// Number of context chunks to retrieve
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_size: Option<u32>,

    /// Model override; the RAG's own model when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl QueryRequest {
    pub fn new(rag_name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            rag_name: rag_name.into(),
            prompt: prompt.into(),
            context_size: None,
            model: None,
        }
    }

    pub fn with_context_size(mut self, context_size: u32) -> Self {
        self.context_size = Some(context_size);
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }
}

/// Body of a streaming agent execution.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentRequest {
    pub query: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_name: Option<String>,

    pub web_search: bool,

    pub verbose: bool,
}

impl AgentRequest {
    /// Verbose by default so the server emits the progress text the timeline feeds on.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            model: None,
            rag_name: None,
            web_search: false,
            verbose: true,
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_rag(mut self, rag_name: String) -> Self {
        self.rag_name = Some(rag_name);
        self
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }
}

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message of the query conversation as the display layer sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub is_error: bool,
    /// Stable key of the message within its conversation
    pub key: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_update_accepts_numeric_id() {
        let update: TaskUpdate = serde_json::from_value(json!({
            "task_id": 3,
            "description": "Search docs",
            "status": "completed",
            "result": "found 2 files",
        }))
        .unwrap();

        assert_eq!(update.task_id, "3");
        assert_eq!(update.status, TaskStatus::Completed);
        assert_eq!(update.result, Some(json!("found 2 files")));
        assert!(update.tool.is_none());
    }

    #[test]
    fn test_task_status_unknown_is_other() {
        let status: TaskStatus = serde_json::from_value(json!("queued")).unwrap();
        assert_eq!(status, TaskStatus::Other);
        assert!(!status.is_terminal());
    }

    #[test]
    fn test_merge_keeps_existing_fields() {
        let mut task: TaskUpdate = serde_json::from_value(json!({
            "task_id": "t1", "description": "Compile results", "status": "running", "tool": "rag"
        }))
        .unwrap();
        let newer: TaskUpdate =
            serde_json::from_value(json!({"task_id": "t1", "status": "failed", "error": "boom"}))
                .unwrap();

        task.merge(newer);
        assert_eq!(task.description, "Compile results");
        assert_eq!(task.tool.as_deref(), Some("rag"));
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_request_bodies_skip_absent_fields() {
        let body = serde_json::to_value(QueryRequest::new("docs", "what?")).unwrap();
        assert_eq!(body, json!({"rag_name": "docs", "prompt": "what?"}));

        let body = serde_json::to_value(AgentRequest::new("plan").with_web_search(true)).unwrap();
        assert_eq!(body, json!({"query": "plan", "web_search": true, "verbose": true}));
    }

    #[test]
    fn test_event_kind_tags() {
        assert_eq!(EventKind::from_tag("answer_chunk"), EventKind::AnswerChunk);
        assert_eq!(EventKind::from_tag("heartbeat"), EventKind::Unknown);
        assert_eq!(EventKind::TaskUpdate.as_str(), "task_update");
    }
}
