use serde::{Deserialize, Serialize};

use crate::cache::StoredAttachment;

/// UI-facing entry type.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    SystemPrompt,
    Task,
    LlmInput,
    LlmOutput,
    LlmOutputFacts,
    LlmOutputPlan,
    Thought,
    ToolCall,
    Observation,
    Step,
    Subagent,
    FinalAnswer,
    Error,
    Facts,
    Plan,
    AgentUserInterface,
    EnvironmentNotification,
}

/// One entry of the flat, ordered log handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Opaque identifier.
    pub id: String,
    /// Simulation time the entry was logged at.
    pub timestamp: f64,
    /// Output type.
    #[serde(rename = "type")]
    pub kind: LogKind,
    /// Rendered text or serialized payload.
    pub content: String,
    /// Id of the enclosing step, sub-agent or synthetic wrapper.
    pub group_id: Option<String>,
    /// Externalized attachments, in declaration order.
    #[serde(default)]
    pub attachments: Vec<StoredAttachment>,
    /// True for entries produced inside a sub-agent run.
    #[serde(default)]
    pub is_subagent: bool,
    /// Exception text for error entries.
    #[serde(default)]
    pub exception: Option<String>,
}

impl LogEntry {
    /// Ungrouped entry without attachments.
    #[must_use]
    pub fn new(id: impl Into<String>, timestamp: f64, kind: LogKind, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            kind,
            content: content.into(),
            group_id: None,
            attachments: Vec::new(),
            is_subagent: false,
            exception: None,
        }
    }
}
