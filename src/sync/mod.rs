//! Background state synchronization.
//!
//! A [`SyncPoller`] computes one sparse [`UpdateRecord`] per iteration; a
//! [`StateSyncWorker`] runs it on a dedicated thread and feeds the records
//! into a FIFO channel.

/// One poll iteration.
pub mod poller;
/// Sparse delta records.
pub mod update;
/// Worker thread.
pub mod worker;

pub use poller::SyncPoller;
pub use update::UpdateRecord;
pub use worker::{StateSyncWorker, WorkerStats};
