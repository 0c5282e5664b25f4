//! World-log projection.
//!
//! Turns the hierarchical, heterogeneously typed world log of a simulation
//! run into the flat, grouped sequence observers render. Attachments are
//! externalized to files on the way.

/// Output entry types.
pub mod entry;
/// Input forest types.
pub mod log;
/// Forest flattening.
pub mod projector;
/// Wrapper synthesis for input/output pairs.
pub mod repair;

pub use entry::{LogEntry, LogKind};
pub use log::{LogNode, WorldLog};
pub use projector::{tool_call_summary, LogProjector};
pub use repair::wrap_input_output_pairs;
