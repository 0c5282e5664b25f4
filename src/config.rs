//! Runtime configuration.
//!
//! Every struct has a `Default` suitable for production and deserializes
//! with per-field defaults, so a host can load a partial JSON document.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncResult;

/// Session lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Idle time after which a session is stopped and removed.
    pub inactivity_limit_ms: u64,
    /// Time between expiry sweeps.
    pub cleanup_interval_ms: u64,
    /// Granularity of the sweep loop's sleep; bounds shutdown latency.
    pub sweep_tick_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            inactivity_limit_ms: 30 * 60 * 1000,
            cleanup_interval_ms: 60 * 1000,
            sweep_tick_ms: 1000,
        }
    }
}

impl RegistryConfig {
    /// Idle time before expiry.
    #[must_use]
    pub const fn inactivity_limit(&self) -> Duration {
        Duration::from_millis(self.inactivity_limit_ms)
    }

    /// Time between sweeps.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Never zero.
    #[must_use]
    pub fn sweep_tick(&self) -> Duration {
        Duration::from_millis(self.sweep_tick_ms.max(1))
    }
}

/// Polling worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep between polls that found no change.
    pub idle_interval_ms: u64,
    /// Minimum clock movement, in simulation time units, before the clock is resent.
    pub clock_resolution: f64,
    /// Upper bound on waiting for a stopped worker to exit.
    pub join_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: 250,
            clock_resolution: 1.0,
            join_timeout_ms: 2000,
        }
    }
}

impl WorkerConfig {
    /// Sleep after a poll with no change.
    #[must_use]
    pub const fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    /// Bound on waiting for a stopped worker.
    #[must_use]
    pub const fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Subscription consumer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Poll interval while waiting for the session to appear.
    pub session_poll_interval_ms: u64,
    /// Give up waiting for the session after this long.
    pub session_wait_timeout_ms: u64,
    /// How often a consumer waiting on an empty queue re-checks that the session still exists.
    pub queue_poll_interval_ms: u64,
    /// Buffer of the async stream handed to transports.
    pub stream_buffer: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            session_poll_interval_ms: 50,
            session_wait_timeout_ms: 10_000,
            queue_poll_interval_ms: 25,
            stream_buffer: 128,
        }
    }
}

impl DispatcherConfig {
    /// Never zero.
    #[must_use]
    pub fn session_poll_interval(&self) -> Duration {
        Duration::from_millis(self.session_poll_interval_ms.max(1))
    }

    /// Bound on waiting for a session to appear.
    #[must_use]
    pub const fn session_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.session_wait_timeout_ms)
    }

    /// Never zero.
    #[must_use]
    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms.max(1))
    }
}

/// Where externalized attachments are written and how they are addressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentConfig {
    /// Root directory; each session writes below `cache_dir/<session_id>`.
    pub cache_dir: PathBuf,
    /// URL prefix; each session is served below `hosting_root/<session_id>`.
    pub hosting_root: String,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("simsync-attachments"),
            hosting_root: "/attachments".to_string(),
        }
    }
}

/// Aggregate configuration.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub registry: RegistryConfig,
    pub worker: WorkerConfig,
    pub dispatcher: DispatcherConfig,
    pub attachments: AttachmentConfig,
}

impl SyncConfig {
    /// Parse a (possibly partial) JSON document; missing fields keep defaults.
    pub fn from_json_str(s: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.worker.idle_interval(), Duration::from_millis(250));
        assert_eq!(cfg.registry.sweep_tick(), Duration::from_secs(1));
        assert!((cfg.worker.clock_resolution - 1.0).abs() < f64::EPSILON);
        assert_eq!(cfg.attachments.hosting_root, "/attachments");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = SyncConfig::from_json_str(
            r#"{"registry": {"inactivity_limit_ms": 500}, "worker": {"idle_interval_ms": 10}}"#,
        )
        .unwrap();
        assert_eq!(cfg.registry.inactivity_limit(), Duration::from_millis(500));
        assert_eq!(cfg.registry.cleanup_interval_ms, 60_000);
        assert_eq!(cfg.worker.idle_interval_ms, 10);
        assert_eq!(cfg.worker.join_timeout_ms, 2000);
        assert_eq!(cfg.dispatcher, DispatcherConfig::default());
    }

    #[test]
    fn zero_tick_is_clamped() {
        let cfg = RegistryConfig {
            sweep_tick_ms: 0,
            ..RegistryConfig::default()
        };
        assert_eq!(cfg.sweep_tick(), Duration::from_millis(1));
    }
}
