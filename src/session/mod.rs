//! Client-addressable simulation sessions.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::SyncResult;
use crate::handle::SimulationHandle;

/// Session lifecycle and expiry.
pub mod registry;

pub use registry::SessionRegistry;

/// Builds the simulation behind a new session.
pub trait SessionFactory: Send + Sync {
    /// Construct a simulation for `session_id`.
    fn create(&self, session_id: &str) -> SyncResult<Arc<dyn SimulationHandle>>;
}

impl<F> SessionFactory for F
where
    F: Fn(&str) -> SyncResult<Arc<dyn SimulationHandle>> + Send + Sync,
{
    fn create(&self, session_id: &str) -> SyncResult<Arc<dyn SimulationHandle>> {
        (self)(session_id)
    }
}

#[derive(Debug, Clone, Copy)]
struct Activity {
    at: Instant,
    wall: DateTime<Utc>,
}

impl Activity {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// A live simulation addressed by an opaque id.
pub struct Session {
    id: String,
    handle: Arc<dyn SimulationHandle>,
    last_active: Mutex<Activity>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("last_active", &self.last_active())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(id: impl Into<String>, handle: Arc<dyn SimulationHandle>) -> Self {
        Self {
            id: id.into(),
            handle,
            last_active: Mutex::new(Activity::now()),
        }
    }

    /// Opaque identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The simulation behind this session.
    #[must_use]
    pub fn handle(&self) -> &Arc<dyn SimulationHandle> {
        &self.handle
    }

    /// Mark the session as used now.
    pub fn touch(&self) {
        if let Ok(mut guard) = self.last_active.lock() {
            *guard = Activity::now();
        }
    }

    /// Wall-clock time of the last access.
    #[must_use]
    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active.lock().map(|a| a.wall).unwrap_or_else(|_| Utc::now())
    }

    /// Time since the last access, measured on the monotonic clock.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        self.last_active
            .lock()
            .map(|a| now.saturating_duration_since(a.at))
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::InMemorySimulation;

    #[test]
    fn touch_resets_idle_time() {
        let session = Session::new("s", Arc::new(InMemorySimulation::new()));
        std::thread::sleep(Duration::from_millis(20));
        assert!(session.idle_for(Instant::now()) >= Duration::from_millis(20));

        let before = session.last_active();
        session.touch();
        assert!(session.idle_for(Instant::now()) < Duration::from_millis(20));
        assert!(session.last_active() >= before);
    }
}
