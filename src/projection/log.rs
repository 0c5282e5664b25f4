//! Hierarchical world-log input.
//!
//! A world log is the arrival-ordered record of one simulation run: agent
//! reasoning, tool calls, observations and nested sub-agent runs. The set
//! of kinds is closed; ingestion of foreign logs maps unknown kinds to
//! [`LogNode::Unrecognized`] so projection can drop them without failing.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::cache::Attachment;
use crate::error::SyncError;

/// One node of the world-log forest.
///
/// Serializes flat, with the kind under `type`; an unrecognized node keeps
/// the tag it was parsed with.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct WorldLog {
    /// Opaque identifier.
    pub id: String,
    /// Simulation time of the node.
    pub timestamp: f64,
    /// Explicit group; overrides the group inherited from the enclosing step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Kind and kind-specific payload.
    #[serde(flatten)]
    pub node: LogNode,
}

impl WorldLog {
    /// Ungrouped node.
    #[must_use]
    pub fn new(id: impl Into<String>, timestamp: f64, node: LogNode) -> Self {
        Self {
            id: id.into(),
            timestamp,
            group_id: None,
            node,
        }
    }

    /// Set an explicit group.
    #[must_use]
    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Parse a JSON node leniently.
    ///
    /// Unknown `type` tags become [`LogNode::Unrecognized`]; malformed
    /// nodes of a known kind are still an error.
    pub fn from_value(value: Value) -> Result<Self, SyncError> {
        let kind = value.get("type").and_then(Value::as_str).map(str::to_string);
        match serde_json::from_value::<RawWorldLog>(value.clone()) {
            Ok(raw) => Ok(raw.into()),
            Err(err) => {
                let Some(kind) = kind else {
                    return Err(err.into());
                };
                if LogNode::is_known_kind(&kind) {
                    return Err(err.into());
                }
                let header: Header = serde_json::from_value(value)?;
                Ok(Self {
                    id: header.id,
                    timestamp: header.timestamp,
                    group_id: header.group_id,
                    node: LogNode::Unrecognized { kind },
                })
            }
        }
    }
}

impl TryFrom<Value> for WorldLog {
    type Error = SyncError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl Serialize for WorldLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.node {
            LogNode::Unrecognized { kind } => UnknownOut {
                id: &self.id,
                timestamp: self.timestamp,
                group_id: self.group_id.as_deref(),
                kind,
            }
            .serialize(serializer),
            node => KnownOut {
                id: &self.id,
                timestamp: self.timestamp,
                group_id: self.group_id.as_deref(),
                node,
            }
            .serialize(serializer),
        }
    }
}

#[derive(Serialize)]
struct KnownOut<'a> {
    id: &'a str,
    timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<&'a str>,
    #[serde(flatten)]
    node: &'a LogNode,
}

#[derive(Serialize)]
struct UnknownOut<'a> {
    id: &'a str,
    timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<&'a str>,
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct RawWorldLog {
    id: String,
    timestamp: f64,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(flatten)]
    node: LogNode,
}

impl From<RawWorldLog> for WorldLog {
    fn from(raw: RawWorldLog) -> Self {
        Self {
            id: raw.id,
            timestamp: raw.timestamp,
            group_id: raw.group_id,
            node: raw.node,
        }
    }
}

#[derive(Deserialize)]
struct Header {
    id: String,
    timestamp: f64,
    #[serde(default)]
    group_id: Option<String>,
}

/// Closed set of world-log kinds.
///
/// Every field carries a default so a bare `{"type": ...}` parses for each
/// known kind.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogNode {
    SystemPrompt {
        #[serde(default)]
        content: String,
    },
    Task {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
    },
    /// Prompt messages sent to the model.
    LlmInput {
        #[serde(default)]
        content: Value,
    },
    LlmOutputThoughtAction {
        #[serde(default)]
        content: String,
    },
    LlmOutputFacts {
        #[serde(default)]
        content: String,
    },
    LlmOutputPlan {
        #[serde(default)]
        content: String,
    },
    Rationale {
        #[serde(default)]
        content: String,
    },
    ToolCall {
        #[serde(default)]
        tool_name: String,
        #[serde(default)]
        tool_arguments: Value,
    },
    Observation {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
    },
    /// Opens a new group.
    Step {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iteration: Option<u64>,
    },
    /// A nested agent run.
    Subagent {
        #[serde(default)]
        name: String,
        #[serde(default)]
        children: Vec<WorldLog>,
    },
    FinalAnswer {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
    },
    Error {
        #[serde(default)]
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exception: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
    },
    Thought {
        #[serde(default)]
        content: String,
    },
    Facts {
        #[serde(default)]
        content: String,
    },
    Plan {
        #[serde(default)]
        content: String,
    },
    Replan {
        #[serde(default)]
        content: String,
    },
    Refacts {
        #[serde(default)]
        content: String,
    },
    AgentUserInterface {
        #[serde(default)]
        content: Value,
    },
    EnvironmentNotification {
        #[serde(default)]
        content: Value,
    },
    // Bookkeeping.
    Stop {
        #[serde(default)]
        content: String,
    },
    EndTask,
    TaskReminder {
        #[serde(default)]
        content: String,
    },
    CodeStateUpdate {
        #[serde(default)]
        content: Value,
    },
    // Recognized, not yet rendered.
    Action {
        #[serde(default)]
        content: Value,
    },
    CodeExecutionResult {
        #[serde(default)]
        content: String,
    },
    Hint {
        #[serde(default)]
        content: String,
    },
    /// A kind this build does not know. Only produced by
    /// [`WorldLog::from_value`] and only serializable through [`WorldLog`].
    #[serde(skip)]
    Unrecognized {
        kind: String,
    },
}

impl LogNode {
    /// True if `kind` names a variant this build can parse.
    #[must_use]
    pub fn is_known_kind(kind: &str) -> bool {
        serde_json::from_value::<Self>(serde_json::json!({ "type": kind })).is_ok()
    }

    /// The serialized `type` tag.
    #[must_use]
    pub fn kind_name(&self) -> &str {
        match self {
            Self::SystemPrompt { .. } => "system_prompt",
            Self::Task { .. } => "task",
            Self::LlmInput { .. } => "llm_input",
            Self::LlmOutputThoughtAction { .. } => "llm_output_thought_action",
            Self::LlmOutputFacts { .. } => "llm_output_facts",
            Self::LlmOutputPlan { .. } => "llm_output_plan",
            Self::Rationale { .. } => "rationale",
            Self::ToolCall { .. } => "tool_call",
            Self::Observation { .. } => "observation",
            Self::Step { .. } => "step",
            Self::Subagent { .. } => "subagent",
            Self::FinalAnswer { .. } => "final_answer",
            Self::Error { .. } => "error",
            Self::Thought { .. } => "thought",
            Self::Facts { .. } => "facts",
            Self::Plan { .. } => "plan",
            Self::Replan { .. } => "replan",
            Self::Refacts { .. } => "refacts",
            Self::AgentUserInterface { .. } => "agent_user_interface",
            Self::EnvironmentNotification { .. } => "environment_notification",
            Self::Stop { .. } => "stop",
            Self::EndTask => "end_task",
            Self::TaskReminder { .. } => "task_reminder",
            Self::CodeStateUpdate { .. } => "code_state_update",
            Self::Action { .. } => "action",
            Self::CodeExecutionResult { .. } => "code_execution_result",
            Self::Hint { .. } => "hint",
            Self::Unrecognized { kind } => kind,
        }
    }
}
