use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::Quantity;
use crate::projection::LogEntry;

/// Sparse delta: only quantities that changed since the last successful poll are set.
///
/// All fields of one record come from one poll iteration. An empty record
/// is never produced by a worker; dispatchers use it as the close sentinel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Full event log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_log: Option<Vec<Value>>,
    /// Full snapshot of every app.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apps_state: Option<Value>,
    /// Initial scheduled-event set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_events: Option<Value>,
    /// Simulation clock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<f64>,
    /// Scenario hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hints: Option<Value>,
    /// Projected world log, complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_logs: Option<Vec<LogEntry>>,
}

impl UpdateRecord {
    /// The clean-close sentinel.
    #[must_use]
    pub fn closed() -> Self {
        Self::default()
    }

    /// True for the close sentinel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed().is_empty()
    }

    /// Quantities present in this record.
    #[must_use]
    pub fn changed(&self) -> Vec<Quantity> {
        let mut out = Vec::new();
        if self.event_log.is_some() {
            out.push(Quantity::EventLog);
        }
        if self.apps_state.is_some() {
            out.push(Quantity::AppsState);
        }
        if self.scheduled_events.is_some() {
            out.push(Quantity::ScheduledEvents);
        }
        if self.clock.is_some() {
            out.push(Quantity::Clock);
        }
        if self.hints.is_some() {
            out.push(Quantity::Hints);
        }
        if self.world_logs.is_some() {
            out.push(Quantity::WorldLogs);
        }
        out
    }
}
