//! Read-only view of a running simulation.
//!
//! The simulation engine itself lives outside this crate. Workers see it
//! only through [`SimulationHandle`]; [`InMemorySimulation`] is a
//! thread-safe implementation for embedded use and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use serde_json::Value;

use crate::error::{lock_err, SyncResult};
use crate::projection::WorldLog;

/// Accessors a state-sync worker needs from a simulation.
///
/// Accessors may fail while the simulation is still starting up; such
/// failures are treated as transient by the worker.
pub trait SimulationHandle: Send + Sync {
    /// Ordered, append-mostly log of completed events.
    fn event_log(&self) -> SyncResult<Vec<Value>>;

    /// True if any app reported a state change since the last `clear_dirty_apps`.
    fn has_dirty_apps(&self) -> bool;

    /// Full snapshot of every app's state.
    fn apps_state(&self) -> SyncResult<Value>;

    /// Reset every app's dirty flag.
    fn clear_dirty_apps(&self);

    /// The scheduled-event set the scenario started with.
    fn scheduled_events(&self) -> SyncResult<Value>;

    /// Simulation clock; monotonically non-decreasing while running.
    fn clock(&self) -> SyncResult<f64>;

    /// Scenario hints.
    fn hints(&self) -> SyncResult<Value>;

    /// Number of top-level world-log nodes. Logs are append-only.
    fn world_log_count(&self) -> SyncResult<usize>;

    /// The hierarchical world-log forest, in arrival order.
    fn world_logs(&self) -> SyncResult<Vec<WorldLog>>;

    /// Stop the simulation and release its resources.
    fn stop(&self);
}

#[derive(Debug, Default)]
struct SimState {
    events: Vec<Value>,
    apps: BTreeMap<String, Value>,
    dirty: BTreeSet<String>,
    scheduled: Vec<Value>,
    clock: f64,
    hints: Vec<Value>,
    world_logs: Vec<WorldLog>,
}

/// In-memory simulation handle.
#[derive(Debug, Default)]
pub struct InMemorySimulation {
    state: RwLock<SimState>,
    stop_calls: AtomicUsize,
}

impl InMemorySimulation {
    /// Empty simulation at clock 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one completed event.
    pub fn push_event(&self, event: Value) -> SyncResult<()> {
        self.state.write().map_err(|_| lock_err("sim.events"))?.events.push(event);
        Ok(())
    }

    /// Replace one app's state and mark it dirty.
    pub fn set_app_state(&self, app: impl Into<String>, state: Value) -> SyncResult<()> {
        let app = app.into();
        let mut guard = self.state.write().map_err(|_| lock_err("sim.apps"))?;
        guard.apps.insert(app.clone(), state);
        guard.dirty.insert(app);
        Ok(())
    }

    /// Add an event to the initial schedule.
    pub fn schedule(&self, event: Value) -> SyncResult<()> {
        self.state.write().map_err(|_| lock_err("sim.scheduled"))?.scheduled.push(event);
        Ok(())
    }

    /// Move the simulation clock.
    pub fn set_clock(&self, clock: f64) -> SyncResult<()> {
        self.state.write().map_err(|_| lock_err("sim.clock"))?.clock = clock;
        Ok(())
    }

    /// Append a scenario hint.
    pub fn push_hint(&self, hint: Value) -> SyncResult<()> {
        self.state.write().map_err(|_| lock_err("sim.hints"))?.hints.push(hint);
        Ok(())
    }

    /// Append a top-level world-log node.
    pub fn push_world_log(&self, log: WorldLog) -> SyncResult<()> {
        self.state.write().map_err(|_| lock_err("sim.world_logs"))?.world_logs.push(log);
        Ok(())
    }

    /// How many times `stop` has been called.
    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.stop_calls.load(Ordering::Acquire)
    }
}

impl SimulationHandle for InMemorySimulation {
    fn event_log(&self) -> SyncResult<Vec<Value>> {
        Ok(self.state.read().map_err(|_| lock_err("sim.events"))?.events.clone())
    }

    fn has_dirty_apps(&self) -> bool {
        self.state.read().map(|s| !s.dirty.is_empty()).unwrap_or(false)
    }

    fn apps_state(&self) -> SyncResult<Value> {
        let guard = self.state.read().map_err(|_| lock_err("sim.apps"))?;
        Ok(Value::Object(
            guard.apps.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        ))
    }

    fn clear_dirty_apps(&self) {
        if let Ok(mut guard) = self.state.write() {
            guard.dirty.clear();
        }
    }

    fn scheduled_events(&self) -> SyncResult<Value> {
        Ok(Value::Array(
            self.state.read().map_err(|_| lock_err("sim.scheduled"))?.scheduled.clone(),
        ))
    }

    fn clock(&self) -> SyncResult<f64> {
        Ok(self.state.read().map_err(|_| lock_err("sim.clock"))?.clock)
    }

    fn hints(&self) -> SyncResult<Value> {
        Ok(Value::Array(
            self.state.read().map_err(|_| lock_err("sim.hints"))?.hints.clone(),
        ))
    }

    fn world_log_count(&self) -> SyncResult<usize> {
        Ok(self.state.read().map_err(|_| lock_err("sim.world_logs"))?.world_logs.len())
    }

    fn world_logs(&self) -> SyncResult<Vec<WorldLog>> {
        Ok(self.state.read().map_err(|_| lock_err("sim.world_logs"))?.world_logs.clone())
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn app_updates_set_and_clear_dirty_flag() {
        let sim = InMemorySimulation::new();
        assert!(!sim.has_dirty_apps());

        sim.set_app_state("messaging", json!({"unread": 2})).unwrap();
        assert!(sim.has_dirty_apps());
        assert_eq!(sim.apps_state().unwrap(), json!({"messaging": {"unread": 2}}));

        sim.clear_dirty_apps();
        assert!(!sim.has_dirty_apps());
    }

    #[test]
    fn accessors_reflect_mutations() {
        let sim = InMemorySimulation::new();
        sim.push_event(json!({"event_id": "e1"})).unwrap();
        sim.schedule(json!({"event_id": "s1"})).unwrap();
        sim.push_hint(json!("check the inbox")).unwrap();
        sim.set_clock(12.5).unwrap();

        assert_eq!(sim.event_log().unwrap().len(), 1);
        assert_eq!(sim.scheduled_events().unwrap(), json!([{"event_id": "s1"}]));
        assert_eq!(sim.hints().unwrap(), json!(["check the inbox"]));
        assert!((sim.clock().unwrap() - 12.5).abs() < f64::EPSILON);
        assert_eq!(sim.world_log_count().unwrap(), 0);
    }

    #[test]
    fn stop_is_counted() {
        let sim = InMemorySimulation::new();
        sim.stop();
        sim.stop();
        assert_eq!(sim.stop_count(), 2);
    }
}
