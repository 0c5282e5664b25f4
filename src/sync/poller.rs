//! One state-sync iteration.

use std::sync::Arc;

use serde_json::Value;

use crate::cache::{ChangeCache, ChangeKey, ChangeMode, Quantity};
use crate::config::WorkerConfig;
use crate::error::SyncResult;
use crate::handle::SimulationHandle;
use crate::projection::LogProjector;

use super::update::UpdateRecord;

/// Computes per-quantity deltas for one session against a [`ChangeCache`] scope.
#[derive(Debug, Clone)]
pub struct SyncPoller {
    session_id: String,
    scope: Option<String>,
    cache: Arc<ChangeCache>,
    projector: LogProjector,
    clock_resolution: f64,
}

impl SyncPoller {
    /// `scope` isolates this poller's cache entries from other pollers on the same session.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        scope: Option<String>,
        cache: Arc<ChangeCache>,
        projector: LogProjector,
        cfg: &WorkerConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            scope,
            cache,
            projector,
            clock_resolution: cfg.clock_resolution,
        }
    }

    /// Session this belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn key(&self, quantity: Quantity) -> ChangeKey {
        match &self.scope {
            Some(scope) => ChangeKey::scoped(quantity, scope.as_str()),
            None => ChangeKey::new(quantity),
        }
    }

    /// Poll every quantity once and return what changed.
    ///
    /// An error leaves the cache partially updated; call [`SyncPoller::reset`]
    /// so the next successful poll resends a full snapshot.
    pub fn poll(&self, handle: &dyn SimulationHandle) -> SyncResult<UpdateRecord> {
        let sid = self.session_id.as_str();
        let mut record = UpdateRecord::default();

        let events = handle.event_log()?;
        let events_changed = self.cache.observe_content(sid, &self.key(Quantity::EventLog), &events)?;
        if events_changed {
            record.event_log = Some(events);
        }

        // New events may have changed derived app state even if no app flagged it.
        if events_changed || handle.has_dirty_apps() {
            record.apps_state = Some(handle.apps_state()?);
            handle.clear_dirty_apps();
        }

        let scheduled = handle.scheduled_events()?;
        if self.cache.observe_content(sid, &self.key(Quantity::ScheduledEvents), &scheduled)? {
            record.scheduled_events = Some(scheduled);
        }

        let clock = handle.clock()?;
        if self.clock_due(clock)? {
            self.cache
                .update(sid, &self.key(Quantity::Clock), &Value::from(clock), ChangeMode::Scalar)?;
            record.clock = Some(clock);
        }

        let log_count = handle.world_log_count()?;
        if self.cache.observe_len(sid, &self.key(Quantity::WorldLogs), log_count)? {
            let forest = handle.world_logs()?;
            record.world_logs = Some(self.projector.project(&forest));
        }

        let hints = handle.hints()?;
        if self.cache.observe_content(sid, &self.key(Quantity::Hints), &hints)? {
            record.hints = Some(hints);
        }

        Ok(record)
    }

    /// Compared against the last surfaced value, not the last observed one.
    fn clock_due(&self, clock: f64) -> SyncResult<bool> {
        let last = self
            .cache
            .last_scalar(&self.session_id, &self.key(Quantity::Clock))?
            .and_then(|v| v.as_f64());
        Ok(match last {
            None => true,
            Some(prev) => (clock - prev).abs() > self.clock_resolution,
        })
    }

    /// Forget everything this poller has sent.
    pub fn reset(&self) -> SyncResult<()> {
        match &self.scope {
            Some(scope) => self.cache.clear_scope(&self.session_id, scope),
            None => self.cache.clear(&self.session_id),
        }
    }
}
