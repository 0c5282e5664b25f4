use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::cache::ChangeCache;
use crate::config::DispatcherConfig;
use crate::session::SessionRegistry;
use crate::sync::{StateSyncWorker, UpdateRecord};

use super::SubscriptionId;

/// Consumer side of one subscription.
///
/// Records arrive in exact production order. When the session goes away or
/// the worker hangs up, the stream yields one [`UpdateRecord::closed`]
/// sentinel and then ends; an explicit [`UpdateStream::close`] does the same.
/// Dropping the stream tears the subscription down.
#[derive(Debug)]
pub struct UpdateStream {
    session_id: String,
    subscription_id: SubscriptionId,
    registry: Arc<SessionRegistry>,
    cache: Arc<ChangeCache>,
    rx: UnboundedReceiver<UpdateRecord>,
    worker: Option<StateSyncWorker>,
    queue_poll: Duration,
    join_timeout: Duration,
    state: StreamState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    SentinelPending,
    Done,
}

impl UpdateStream {
    pub(crate) fn new(
        subscription_id: SubscriptionId,
        registry: Arc<SessionRegistry>,
        cache: Arc<ChangeCache>,
        rx: UnboundedReceiver<UpdateRecord>,
        worker: StateSyncWorker,
        cfg: &DispatcherConfig,
        join_timeout: Duration,
    ) -> Self {
        Self {
            session_id: worker.session_id().to_string(),
            subscription_id,
            registry,
            cache,
            rx,
            worker: Some(worker),
            queue_poll: cfg.queue_poll_interval(),
            join_timeout,
            state: StreamState::Open,
        }
    }

    /// Session this belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Id of this subscription.
    #[must_use]
    pub const fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Next record, suspending while the queue is empty.
    ///
    /// Returns the close sentinel exactly once after the session is gone or
    /// the stream was closed, then `None`.
    pub async fn next(&mut self) -> Option<UpdateRecord> {
        match self.state {
            StreamState::Done => return None,
            StreamState::SentinelPending => {
                self.state = StreamState::Done;
                return Some(UpdateRecord::closed());
            }
            StreamState::Open => {}
        }
        loop {
            if !self.registry.exists(&self.session_id) {
                debug!(session_id = %self.session_id, subscription = %self.subscription_id, "session gone; closing stream");
                break;
            }
            // The timer only bounds how long a vanished session goes unnoticed.
            tokio::select! {
                biased;
                msg = self.rx.recv() => match msg {
                    Some(record) => return Some(record),
                    None => {
                        debug!(session_id = %self.session_id, subscription = %self.subscription_id, "worker hung up; closing stream");
                        break;
                    }
                },
                () = tokio::time::sleep(self.queue_poll) => {}
            }
        }
        self.shutdown_worker().await;
        self.state = StreamState::Done;
        Some(UpdateRecord::closed())
    }

    /// Stop the worker, wait for it with a bounded join, and purge this
    /// subscription's change-cache entries.
    ///
    /// Idempotent. If the sentinel has not been yielded yet, the next call to
    /// [`UpdateStream::next`] returns it.
    pub async fn close(&mut self) {
        if self.state == StreamState::Open {
            self.state = StreamState::SentinelPending;
        }
        self.shutdown_worker().await;
    }

    async fn shutdown_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.stop();
        let cache = Arc::clone(&self.cache);
        let session_id = self.session_id.clone();
        let scope = self.subscription_id.to_string();
        let timeout = self.join_timeout;
        if let Err(err) =
            tokio::task::spawn_blocking(move || teardown(worker, &cache, &session_id, &scope, timeout)).await
        {
            warn!(session_id = %self.session_id, error = %err, "subscription teardown task failed");
        }
    }

    /// Adapt into a `Stream` for transports.
    ///
    /// A forwarding task owns the subscription; it is torn down when the
    /// returned stream is dropped or the session ends. Must be called from
    /// within a tokio runtime.
    #[must_use]
    pub fn into_stream(mut self, buffer: usize) -> ReceiverStream<UpdateRecord> {
        let (tx, rx) = tokio::sync::mpsc::channel(buffer.max(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tx.closed() => break,
                    next = self.next() => match next {
                        Some(record) => {
                            if tx.send(record).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            self.close().await;
        });
        ReceiverStream::new(rx)
    }
}

fn teardown(mut worker: StateSyncWorker, cache: &ChangeCache, session_id: &str, scope: &str, timeout: Duration) {
    worker.shutdown(timeout);
    if let Err(err) = cache.clear_scope(session_id, scope) {
        warn!(session_id, error = %err, "failed to purge change cache scope");
    }
    debug!(session_id, subscription = scope, "subscription torn down");
}

impl Drop for UpdateStream {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.stop();
        let cache = Arc::clone(&self.cache);
        let session_id = std::mem::take(&mut self.session_id);
        let scope = self.subscription_id.to_string();
        let timeout = self.join_timeout;
        // Never block an async executor thread on the join.
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                drop(rt.spawn_blocking(move || teardown(worker, &cache, &session_id, &scope, timeout)));
            }
            Err(_) => teardown(worker, &cache, &session_id, &scope, timeout),
        }
    }
}
