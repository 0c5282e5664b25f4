//! Background polling worker.
//!
//! One worker thread per open subscription. The worker pushes non-empty
//! [`UpdateRecord`]s into an unbounded FIFO and is the only producer on it.
//! Failures are contained per iteration; a failing handle makes the
//! subscription stale, never closed.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::config::WorkerConfig;
use crate::error::{ExecutionError, SyncError, SyncResult};
use crate::session::{Session, SessionRegistry};

use super::poller::SyncPoller;
use super::update::UpdateRecord;

/// Counters for one worker.
#[derive(Debug, Default)]
pub struct WorkerStats {
    iterations: AtomicU64,
    records: AtomicU64,
    failures: AtomicU64,
}

impl WorkerStats {
    /// Poll iterations started.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Records handed to the consumer queue.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    /// Iterations that ended in an error or panic.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Handle to a running state-sync worker thread.
#[derive(Debug)]
pub struct StateSyncWorker {
    session_id: String,
    keep_alive: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    join: Option<JoinHandle<()>>,
}

impl StateSyncWorker {
    /// Spawn a worker for the poller's session.
    ///
    /// The worker creates the session on first iteration and exits once the
    /// session is gone, the keep-alive flag is cleared, or the consumer hung up.
    pub fn spawn(
        registry: Arc<SessionRegistry>,
        poller: SyncPoller,
        tx: UnboundedSender<UpdateRecord>,
        cfg: &WorkerConfig,
    ) -> SyncResult<Self> {
        let session_id = poller.session_id().to_string();
        let keep_alive = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(WorkerStats::default());

        let name = format!("simsync-sync-{session_id}");
        let thread_keep_alive = Arc::clone(&keep_alive);
        let thread_stats = Arc::clone(&stats);
        let idle = cfg.idle_interval();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&registry, &poller, &tx, &thread_keep_alive, &thread_stats, idle))
            .map_err(|e| ExecutionError::WorkerSpawn {
                name,
                reason: e.to_string(),
            })?;

        Ok(Self {
            session_id,
            keep_alive,
            stats,
            join: Some(join),
        })
    }

    /// Session this belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Shared counters; stay readable after the worker exits.
    #[must_use]
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Clear the keep-alive flag. Non-blocking and idempotent.
    pub fn stop(&self) {
        self.keep_alive.store(false, Ordering::Release);
    }

    /// True once the thread has exited or was detached.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Join the thread if it has already exited. Returns true once joined.
    pub fn try_join(&mut self) -> bool {
        if !self.is_finished() {
            return false;
        }
        if let Some(handle) = self.join.take() {
            if handle.join().is_err() {
                warn!(session_id = %self.session_id, "state sync worker panicked");
            }
        }
        true
    }

    /// Stop and wait at most `timeout` for the thread to exit.
    ///
    /// On timeout the thread is detached; it exits at its next keep-alive check.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        self.stop();
        let deadline = Instant::now() + timeout;
        while !self.try_join() {
            if Instant::now() >= deadline {
                warn!(session_id = %self.session_id, timeout_ms = timeout.as_millis() as u64, "worker join timed out; detaching");
                self.join = None;
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

impl Drop for StateSyncWorker {
    fn drop(&mut self) {
        // Signal only; owners that need the thread gone call `shutdown`.
        self.stop();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn worker_loop(
    registry: &SessionRegistry,
    poller: &SyncPoller,
    tx: &UnboundedSender<UpdateRecord>,
    keep_alive: &AtomicBool,
    stats: &WorkerStats,
    idle: Duration,
) {
    let session_id = poller.session_id();
    debug!(session_id, "state sync worker started");

    let mut attached = false;
    while keep_alive.load(Ordering::Acquire) {
        let session: Arc<Session> = if attached {
            match registry.get(session_id) {
                Ok(Some(s)) => s,
                Ok(None) => {
                    debug!(session_id, "session gone; worker exiting");
                    break;
                }
                Err(err) => {
                    warn!(session_id, error = %err, "session lookup failed");
                    thread::sleep(idle);
                    continue;
                }
            }
        } else {
            match registry.get_or_create(session_id) {
                Ok(s) => {
                    attached = true;
                    s
                }
                Err(err) => {
                    warn!(session_id, error = %err, "session not available yet");
                    thread::sleep(idle);
                    continue;
                }
            }
        };

        stats.iterations.fetch_add(1, Ordering::Relaxed);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| poller.poll(session.handle().as_ref())))
            .unwrap_or_else(|payload| {
                Err(SyncError::from(ExecutionError::WorkerPanicked {
                    message: panic_message(payload.as_ref()),
                }))
            });

        match outcome {
            Ok(record) if !record.is_empty() => {
                if tx.send(record).is_err() {
                    debug!(session_id, "consumer hung up; worker exiting");
                    break;
                }
                stats.records.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => thread::sleep(idle),
            Err(err) => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(session_id, error = %err, "state sync iteration failed");
                if let Err(reset_err) = poller.reset() {
                    warn!(session_id, error = %reset_err, "failed to reset change cache scope");
                }
                thread::sleep(idle);
            }
        }
    }

    debug!(session_id, "state sync worker stopped");
}
