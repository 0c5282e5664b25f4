//! World-log forest to flat entry sequence.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn};

use crate::cache::{Attachment, AttachmentCache, AttachmentLocation, StoredAttachment};

use super::entry::{LogEntry, LogKind};
use super::log::{LogNode, WorldLog};
use super::repair::wrap_input_output_pairs;

/// What a node turns into.
enum Rule<'a> {
    Emit {
        kind: LogKind,
        content: String,
        attachments: &'a [Attachment],
        exception: Option<String>,
    },
    Step(Option<u64>),
    Subagent {
        name: &'a str,
        children: &'a [WorldLog],
    },
    Bookkeeping,
    Unsupported,
    Unrecognized,
}

fn emit(kind: LogKind, content: impl Into<String>) -> Rule<'static> {
    Rule::Emit {
        kind,
        content: content.into(),
        attachments: &[],
        exception: None,
    }
}

fn payload(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `name(key=value, ...)` with keys sorted.
#[must_use]
pub fn tool_call_summary(tool_name: &str, arguments: &Value) -> String {
    match arguments {
        Value::Null => format!("{tool_name}()"),
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let args: Vec<String> = sorted.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
            format!("{tool_name}({})", args.join(", "))
        }
        other => format!("{tool_name}({other})"),
    }
}

fn rule(node: &LogNode) -> Rule<'_> {
    match node {
        LogNode::SystemPrompt { content } => emit(LogKind::SystemPrompt, content.as_str()),
        LogNode::Task { content, attachments } => Rule::Emit {
            kind: LogKind::Task,
            content: content.clone(),
            attachments,
            exception: None,
        },
        LogNode::LlmInput { content } => emit(LogKind::LlmInput, payload(content)),
        LogNode::LlmOutputThoughtAction { content } => emit(LogKind::LlmOutput, content.as_str()),
        LogNode::LlmOutputFacts { content } => emit(LogKind::LlmOutputFacts, content.as_str()),
        LogNode::LlmOutputPlan { content } => emit(LogKind::LlmOutputPlan, content.as_str()),
        LogNode::Rationale { content } | LogNode::Thought { content } => emit(LogKind::Thought, content.as_str()),
        LogNode::ToolCall {
            tool_name,
            tool_arguments,
        } => emit(LogKind::ToolCall, tool_call_summary(tool_name, tool_arguments)),
        LogNode::Observation { content, attachments } => Rule::Emit {
            kind: LogKind::Observation,
            content: content.clone(),
            attachments,
            exception: None,
        },
        LogNode::Step { iteration } => Rule::Step(*iteration),
        LogNode::Subagent { name, children } => Rule::Subagent { name, children },
        LogNode::FinalAnswer { content, attachments } => Rule::Emit {
            kind: LogKind::FinalAnswer,
            content: content.clone(),
            attachments,
            exception: None,
        },
        LogNode::Error {
            error,
            exception,
            category,
        } => Rule::Emit {
            kind: LogKind::Error,
            content: match category {
                Some(c) => format!("[{c}] {error}"),
                None => error.clone(),
            },
            attachments: &[],
            exception: exception.clone(),
        },
        LogNode::Facts { content } | LogNode::Refacts { content } => emit(LogKind::Facts, content.as_str()),
        LogNode::Plan { content } | LogNode::Replan { content } => emit(LogKind::Plan, content.as_str()),
        LogNode::AgentUserInterface { content } => emit(LogKind::AgentUserInterface, payload(content)),
        LogNode::EnvironmentNotification { content } => emit(LogKind::EnvironmentNotification, payload(content)),
        LogNode::Stop { .. } | LogNode::EndTask | LogNode::TaskReminder { .. } | LogNode::CodeStateUpdate { .. } => {
            Rule::Bookkeeping
        }
        LogNode::Action { .. } | LogNode::CodeExecutionResult { .. } | LogNode::Hint { .. } => Rule::Unsupported,
        LogNode::Unrecognized { .. } => Rule::Unrecognized,
    }
}

/// Flattens world-log forests, externalizing attachments through a shared cache.
#[derive(Debug, Clone)]
pub struct LogProjector {
    attachments: Arc<AttachmentCache>,
    location: AttachmentLocation,
}

impl LogProjector {
    /// Projector writing attachments to `location`.
    #[must_use]
    pub fn new(attachments: Arc<AttachmentCache>, location: AttachmentLocation) -> Self {
        Self { attachments, location }
    }

    /// Where attachments are written.
    #[must_use]
    pub fn location(&self) -> &AttachmentLocation {
        &self.location
    }

    /// Project a forest into a flat sequence, stable-sorted by timestamp.
    ///
    /// Never fails: unknown kinds and broken attachments are logged and skipped.
    #[must_use]
    pub fn project(&self, forest: &[WorldLog]) -> Vec<LogEntry> {
        let mut out = Vec::new();
        self.project_level(forest, None, false, &mut out);
        // `sort_by` is stable; equal timestamps keep arrival order.
        out.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        wrap_input_output_pairs(&mut out);
        out
    }

    fn project_level(&self, nodes: &[WorldLog], enclosing: Option<&str>, subagent: bool, out: &mut Vec<LogEntry>) {
        let mut current: Option<String> = enclosing.map(str::to_string);

        for node in nodes {
            match rule(&node.node) {
                Rule::Step(iteration) => {
                    let content = iteration.map_or_else(|| "Step".to_string(), |i| format!("Step {i}"));
                    let mut entry = LogEntry::new(node.id.clone(), node.timestamp, LogKind::Step, content);
                    entry.group_id = node.group_id.clone().or_else(|| enclosing.map(str::to_string));
                    entry.is_subagent = subagent;
                    out.push(entry);
                    current = Some(node.id.clone());
                }
                Rule::Subagent { name, children } => {
                    let mut entry = LogEntry::new(node.id.clone(), node.timestamp, LogKind::Subagent, name);
                    entry.group_id = node.group_id.clone().or_else(|| current.clone());
                    entry.is_subagent = subagent;
                    out.push(entry);
                    self.project_level(children, Some(&node.id), true, out);
                }
                Rule::Emit {
                    kind,
                    content,
                    attachments,
                    exception,
                } => {
                    let mut entry = LogEntry::new(node.id.clone(), node.timestamp, kind, content);
                    entry.group_id = node.group_id.clone().or_else(|| current.clone());
                    entry.is_subagent = subagent;
                    entry.exception = exception;
                    entry.attachments = self.externalize(&node.id, attachments);
                    out.push(entry);
                }
                Rule::Bookkeeping => {}
                Rule::Unsupported => {
                    warn!(log_id = %node.id, kind = node.node.kind_name(), "log kind not supported yet; dropping entry");
                }
                Rule::Unrecognized => {
                    error!(log_id = %node.id, kind = node.node.kind_name(), "unrecognized log kind; dropping entry");
                }
            }
        }
    }

    fn externalize(&self, log_id: &str, attachments: &[Attachment]) -> Vec<StoredAttachment> {
        attachments
            .iter()
            .enumerate()
            .filter_map(|(index, att)| {
                match self.attachments.externalize(&self.location, log_id, index, att) {
                    Ok(stored) => Some(stored),
                    Err(err) => {
                        warn!(log_id, index, error = %err, "skipping attachment");
                        None
                    }
                }
            })
            .collect()
    }
}
