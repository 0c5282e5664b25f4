//! Subscription dispatch.
//!
//! Bridges each background worker to an async consumer through a FIFO
//! channel. The consumer suspends on an empty queue and owns cancellation.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subscription entry point.
pub mod dispatcher;
/// Consumer half of a subscription.
pub mod stream;

pub use dispatcher::StreamDispatcher;
pub use stream::UpdateStream;

/// Identifies one subscription; also scopes its change-cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
