//! Post-hoc structural repair of a projected log.
//!
//! Planning and fact-update calls show up as a bare model input followed by
//! its facts/plan output. Each such pair is wrapped in a synthetic
//! sub-agent entry so the UI renders it as one collapsible unit.

use uuid::Uuid;

use super::entry::{LogEntry, LogKind};

/// Wrapper id for an input entry; stable across re-projections.
#[must_use]
pub fn wrapper_id(input_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("wrapper:{input_id}").as_bytes()).to_string()
}

/// Insert a wrapper before every `llm_input` immediately followed by facts or plan output.
///
/// The scan advances past each inserted triple and never looks into the
/// wrappers it creates. Returns the number of wrappers inserted.
pub fn wrap_input_output_pairs(entries: &mut Vec<LogEntry>) -> usize {
    let mut inserted = 0;
    let mut i = 0;
    while i + 1 < entries.len() {
        let label = match (entries[i].kind, entries[i + 1].kind) {
            (LogKind::LlmInput, LogKind::LlmOutputFacts) => "Updating facts",
            (LogKind::LlmInput, LogKind::LlmOutputPlan) => "Planning",
            _ => {
                i += 1;
                continue;
            }
        };

        let input = &entries[i];
        let mut wrapper = LogEntry::new(wrapper_id(&input.id), input.timestamp, LogKind::Subagent, label);
        wrapper.group_id = input.group_id.clone();
        wrapper.is_subagent = input.is_subagent;

        entries[i].group_id = Some(wrapper.id.clone());
        entries[i + 1].group_id = Some(wrapper.id.clone());
        entries.insert(i, wrapper);

        inserted += 1;
        i += 3;
    }
    inserted
}
