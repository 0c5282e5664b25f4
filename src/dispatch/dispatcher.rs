use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::cache::{AttachmentCache, AttachmentLocation, ChangeCache};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::projection::LogProjector;
use crate::session::SessionRegistry;
use crate::sync::{StateSyncWorker, SyncPoller, UpdateRecord};

use super::stream::UpdateStream;
use super::SubscriptionId;

/// Opens subscriptions against a [`SessionRegistry`].
///
/// Holds the process-scoped caches and injects them into every worker.
#[derive(Debug, Clone)]
pub struct StreamDispatcher {
    registry: Arc<SessionRegistry>,
    cache: Arc<ChangeCache>,
    attachments: Arc<AttachmentCache>,
    cfg: SyncConfig,
}

impl StreamDispatcher {
    /// Dispatcher with fresh caches.
    #[must_use]
    pub fn new(cfg: SyncConfig, registry: Arc<SessionRegistry>) -> Self {
        Self::with_caches(cfg, registry, Arc::new(ChangeCache::new()), Arc::new(AttachmentCache::new()))
    }

    /// Dispatcher sharing caches with other dispatchers.
    #[must_use]
    pub fn with_caches(
        cfg: SyncConfig,
        registry: Arc<SessionRegistry>,
        cache: Arc<ChangeCache>,
        attachments: Arc<AttachmentCache>,
    ) -> Self {
        Self {
            registry,
            cache,
            attachments,
            cfg,
        }
    }

    /// The registry subscriptions attach to.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Shared change cache.
    #[must_use]
    pub fn change_cache(&self) -> &Arc<ChangeCache> {
        &self.cache
    }

    /// Shared attachment cache.
    #[must_use]
    pub fn attachment_cache(&self) -> &Arc<AttachmentCache> {
        &self.attachments
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.cfg
    }

    /// Start a worker for `session_id` and wait for the session to exist.
    ///
    /// The worker creates the session on its first iteration. If the session
    /// does not appear within the configured wait timeout, the worker is torn
    /// down and `SessionNotFound` is returned; callers should not retry.
    pub async fn subscribe(&self, session_id: &str) -> SyncResult<UpdateStream> {
        let subscription_id = SubscriptionId::new();
        let (tx, rx) = unbounded_channel();

        let location = AttachmentLocation::for_session(&self.cfg.attachments, session_id);
        let projector = LogProjector::new(Arc::clone(&self.attachments), location);
        let poller = SyncPoller::new(
            session_id,
            Some(subscription_id.to_string()),
            Arc::clone(&self.cache),
            projector,
            &self.cfg.worker,
        );
        let worker = StateSyncWorker::spawn(Arc::clone(&self.registry), poller, tx, &self.cfg.worker)?;
        let mut stream = UpdateStream::new(
            subscription_id,
            Arc::clone(&self.registry),
            Arc::clone(&self.cache),
            rx,
            worker,
            &self.cfg.dispatcher,
            self.cfg.worker.join_timeout(),
        );

        let poll = self.cfg.dispatcher.session_poll_interval();
        let deadline = tokio::time::Instant::now() + self.cfg.dispatcher.session_wait_timeout();
        while !self.registry.exists(session_id) {
            if tokio::time::Instant::now() >= deadline {
                debug!(session_id, subscription = %subscription_id, "session never appeared");
                stream.close().await;
                return Err(SyncError::session_not_found(session_id));
            }
            tokio::time::sleep(poll).await;
        }

        info!(session_id, subscription = %subscription_id, "subscription opened");
        Ok(stream)
    }

    /// Like [`StreamDispatcher::subscribe`], adapted to a `Stream` with the configured buffer.
    pub async fn subscribe_stream(&self, session_id: &str) -> SyncResult<ReceiverStream<UpdateRecord>> {
        let stream = self.subscribe(session_id).await?;
        Ok(stream.into_stream(self.cfg.dispatcher.stream_buffer))
    }

    /// Forget what every subscriber of `session_id` has been sent; each one's
    /// next poll carries a full snapshot.
    pub fn request_full_resend(&self, session_id: &str) -> SyncResult<()> {
        info!(session_id, "full resend requested");
        self.cache.clear(session_id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_total(&self) -> usize {
        self.registry.total()
    }

    /// Last-active time of every live session.
    pub fn session_status(&self) -> SyncResult<HashMap<String, DateTime<Utc>>> {
        self.registry.status()
    }
}
