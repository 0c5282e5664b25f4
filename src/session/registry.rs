//! Session registry with inactivity expiry.
//!
//! Key invariants:
//! - At most one `Session` is ever constructed per id, even when many
//!   callers hit the same unknown id concurrently.
//! - A session's handle is stopped exactly once, by whichever path
//!   (sweep, `remove`, `stop`) takes it out of the map.
//! - No registry lock is held while a handle is stopped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::{lock_err, ExecutionError, SyncResult};

use super::{Session, SessionFactory};

struct RegistryInner {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    create_lock: Mutex<()>,
    factory: Arc<dyn SessionFactory>,
    cfg: RegistryConfig,
    enabled: AtomicBool,
}

impl RegistryInner {
    fn lookup(&self, session_id: &str) -> SyncResult<Option<Arc<Session>>> {
        Ok(self
            .sessions
            .read()
            .map_err(|_| lock_err("sessions"))?
            .get(session_id)
            .cloned())
    }

    fn sweep_expired(&self, now: Instant) -> SyncResult<Vec<String>> {
        let limit = self.cfg.inactivity_limit();
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().map_err(|_| lock_err("sessions"))?;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.idle_for(now) > limit)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        let mut ids = Vec::with_capacity(expired.len());
        for session in expired {
            info!(session_id = session.id(), "session expired after inactivity");
            session.handle().stop();
            ids.push(session.id().to_string());
        }
        Ok(ids)
    }

    fn sweep_loop(&self) {
        let interval = self.cfg.cleanup_interval();
        let tick = self.cfg.sweep_tick();

        while self.enabled.load(Ordering::Acquire) {
            if let Err(err) = self.sweep_expired(Instant::now()) {
                warn!(error = %err, "session sweep failed");
            }

            // Sleep in short ticks so shutdown is not delayed by a full interval.
            let mut waited = Duration::ZERO;
            while waited < interval && self.enabled.load(Ordering::Acquire) {
                let step = tick.min(interval - waited);
                thread::sleep(step);
                waited += step;
            }
        }
        debug!("session sweep loop exited");
    }
}

/// Owns every live session.
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("total", &self.total())
            .field("cfg", &self.inner.cfg)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Empty registry; call [`SessionRegistry::start`] to enable expiry.
    #[must_use]
    pub fn new(cfg: RegistryConfig, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                create_lock: Mutex::new(()),
                factory,
                cfg,
                enabled: AtomicBool::new(false),
            }),
            sweeper: Mutex::new(None),
        }
    }

    /// Return the session for `session_id`, constructing it on first access.
    ///
    /// Every call refreshes the session's last-active time.
    pub fn get_or_create(&self, session_id: &str) -> SyncResult<Arc<Session>> {
        if let Some(session) = self.inner.lookup(session_id)? {
            session.touch();
            return Ok(session);
        }

        let _guard = self.inner.create_lock.lock().map_err(|_| lock_err("sessions.create"))?;
        if let Some(session) = self.inner.lookup(session_id)? {
            session.touch();
            return Ok(session);
        }

        let handle = self.inner.factory.create(session_id).map_err(|err| ExecutionError::SessionCreation {
            session_id: session_id.to_string(),
            reason: err.to_string(),
        })?;
        let session = Arc::new(Session::new(session_id, handle));
        self.inner
            .sessions
            .write()
            .map_err(|_| lock_err("sessions"))?
            .insert(session_id.to_string(), Arc::clone(&session));

        info!(session_id, "session created");
        Ok(session)
    }

    /// Existing session, refreshed; never constructs.
    pub fn get(&self, session_id: &str) -> SyncResult<Option<Arc<Session>>> {
        let session = self.inner.lookup(session_id)?;
        if let Some(s) = &session {
            s.touch();
        }
        Ok(session)
    }

    /// True if the session is live. Does not refresh it.
    #[must_use]
    pub fn exists(&self, session_id: &str) -> bool {
        self.inner.lookup(session_id).map(|s| s.is_some()).unwrap_or(false)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn total(&self) -> usize {
        self.inner.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Last-active time of every live session.
    pub fn status(&self) -> SyncResult<HashMap<String, DateTime<Utc>>> {
        Ok(self
            .inner
            .sessions
            .read()
            .map_err(|_| lock_err("sessions"))?
            .iter()
            .map(|(id, s)| (id.clone(), s.last_active()))
            .collect())
    }

    /// Stop and drop one session. Returns false if it did not exist.
    pub fn remove(&self, session_id: &str) -> SyncResult<bool> {
        let removed = self
            .inner
            .sessions
            .write()
            .map_err(|_| lock_err("sessions"))?
            .remove(session_id);
        match removed {
            Some(session) => {
                info!(session_id, "session removed");
                session.handle().stop();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run one expiry pass now; returns the ids that were removed.
    pub fn sweep(&self) -> SyncResult<Vec<String>> {
        self.inner.sweep_expired(Instant::now())
    }

    /// Start the background sweep loop. Idempotent.
    pub fn start(&self) -> SyncResult<()> {
        let mut sweeper = self.sweeper.lock().map_err(|_| lock_err("sessions.sweeper"))?;
        if sweeper.is_some() {
            return Ok(());
        }

        self.inner.enabled.store(true, Ordering::Release);
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("simsync-session-sweep".to_string())
            .spawn(move || inner.sweep_loop())
            .map_err(|e| ExecutionError::WorkerSpawn {
                name: "simsync-session-sweep".to_string(),
                reason: e.to_string(),
            })?;
        *sweeper = Some(handle);
        Ok(())
    }

    /// Stop the sweep loop, then stop and drop every live session.
    pub fn stop(&self) -> SyncResult<()> {
        self.inner.enabled.store(false, Ordering::Release);

        let handle = self.sweeper.lock().map_err(|_| lock_err("sessions.sweeper"))?.take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("session sweep thread panicked");
            }
        }

        let drained: Vec<Arc<Session>> = self
            .inner
            .sessions
            .write()
            .map_err(|_| lock_err("sessions"))?
            .drain()
            .map(|(_, s)| s)
            .collect();
        for session in drained {
            session.handle().stop();
        }
        info!("session registry stopped");
        Ok(())
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        // Signal only. The loop exits within one tick; joining here could
        // stall the dropping thread for that long.
        self.inner.enabled.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::handle::{InMemorySimulation, SimulationHandle};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    fn in_memory_factory() -> Arc<dyn SessionFactory> {
        Arc::new(|_: &str| -> SyncResult<Arc<dyn SimulationHandle>> { Ok(Arc::new(InMemorySimulation::new())) })
    }

    fn fast_cfg() -> RegistryConfig {
        RegistryConfig {
            inactivity_limit_ms: 100,
            cleanup_interval_ms: 200,
            sweep_tick_ms: 20,
        }
    }

    #[test]
    fn concurrent_first_access_constructs_once() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let factory: Arc<dyn SessionFactory> = Arc::new(move |_: &str| -> SyncResult<Arc<dyn SimulationHandle>> {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            Ok(Arc::new(InMemorySimulation::new()))
        });
        let registry = Arc::new(SessionRegistry::new(RegistryConfig::default(), factory));

        let n = 16;
        let barrier = Arc::new(Barrier::new(n));
        let threads: Vec<_> = (0..n)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_create("shared").unwrap()
                })
            })
            .collect();
        let sessions: Vec<Arc<Session>> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.total(), 1);
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    }

    #[test]
    fn factory_failure_is_reported_and_nothing_stored() {
        let factory: Arc<dyn SessionFactory> = Arc::new(|_: &str| -> SyncResult<Arc<dyn SimulationHandle>> {
            Err(SyncError::not_ready("scenario still loading"))
        });
        let registry = SessionRegistry::new(RegistryConfig::default(), factory);
        let err = registry.get_or_create("s").unwrap_err();
        assert!(format!("{err}").contains("scenario still loading"));
        assert!(!registry.exists("s"));
    }

    #[test]
    fn manual_sweep_removes_only_idle_sessions() {
        let registry = SessionRegistry::new(fast_cfg(), in_memory_factory());
        registry.get_or_create("idle").unwrap();
        thread::sleep(Duration::from_millis(150));
        registry.get_or_create("fresh").unwrap();

        let removed = registry.sweep().unwrap();
        assert_eq!(removed, vec!["idle".to_string()]);
        assert!(registry.exists("fresh"));
        assert!(!registry.exists("idle"));
    }

    #[test]
    fn status_and_remove() {
        let registry = SessionRegistry::new(RegistryConfig::default(), in_memory_factory());
        registry.get_or_create("a").unwrap();
        registry.get_or_create("b").unwrap();

        let status = registry.status().unwrap();
        assert_eq!(status.len(), 2);
        assert!(status.contains_key("a"));

        assert!(registry.remove("a").unwrap());
        assert!(!registry.remove("a").unwrap());
        assert_eq!(registry.total(), 1);
        assert!(registry.get("a").unwrap().is_none());
        assert!(registry.get("b").unwrap().is_some());
    }

    #[test]
    fn stop_joins_quickly_and_drains_sessions() {
        let cfg = RegistryConfig {
            inactivity_limit_ms: 60_000,
            cleanup_interval_ms: 60_000,
            sweep_tick_ms: 50,
        };
        let registry = SessionRegistry::new(cfg, in_memory_factory());
        registry.start().unwrap();
        registry.start().unwrap();
        registry.get_or_create("s").unwrap();

        let started = Instant::now();
        registry.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(registry.total(), 0);
    }
}
