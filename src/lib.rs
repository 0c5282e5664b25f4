//! # simsync - Real-time state sync for running simulations
//!
//! simsync streams change-only deltas of a live simulation's state to
//! subscribers, and projects the simulation's hierarchical agent log into
//! the flat, grouped sequence a UI renders.
//!
//! ## Core Concepts
//!
//! - **Session**: A live simulation addressed by an opaque id, expired after inactivity
//! - **Quantity**: One tracked slice of state (event log, apps state, clock, ...)
//! - **UpdateRecord**: A sparse delta holding only the quantities that changed
//! - **World log**: The hierarchical record of agent reasoning and tool calls
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use simsync::{InMemorySimulation, SessionRegistry, SimulationHandle, StreamDispatcher, SyncConfig};
//!
//! let cfg = SyncConfig::default();
//! let registry = Arc::new(SessionRegistry::new(
//!     cfg.registry.clone(),
//!     Arc::new(|_: &str| Ok(Arc::new(InMemorySimulation::new()) as Arc<dyn SimulationHandle>)),
//! ));
//! registry.start()?;
//!
//! let dispatcher = StreamDispatcher::new(cfg, Arc::clone(&registry));
//! let mut updates = dispatcher.subscribe("session-1").await?;
//! while let Some(record) = updates.next().await {
//!     if record.is_empty() {
//!         break; // session closed
//!     }
//!     send_to_client(&record);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Change detection and attachment caches.
pub mod cache;
/// Runtime configuration.
pub mod config;
/// Subscriptions and update streams.
pub mod dispatch;
/// Error taxonomy.
pub mod error;
/// Simulation handle abstraction.
pub mod handle;
/// World-log projection.
pub mod projection;
/// Sessions and their registry.
pub mod session;
/// Background state synchronization.
pub mod sync;

pub use cache::{Attachment, AttachmentCache, AttachmentLocation, ChangeCache, ChangeKey, ChangeMode, Quantity};
pub use config::{AttachmentConfig, DispatcherConfig, RegistryConfig, SyncConfig, WorkerConfig};
pub use dispatch::{StreamDispatcher, SubscriptionId, UpdateStream};
pub use error::{ExecutionError, ProjectionError, SyncError, SyncResult};
pub use handle::{InMemorySimulation, SimulationHandle};
pub use projection::{LogEntry, LogKind, LogNode, LogProjector, WorldLog};
pub use session::{Session, SessionFactory, SessionRegistry};
pub use sync::{StateSyncWorker, SyncPoller, UpdateRecord, WorkerStats};
