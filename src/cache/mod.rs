//! Change detection and attachment caches.

/// Process-wide attachment cache.
pub mod attachment;
/// Per-session fingerprint cache.
pub mod change;

pub use attachment::{
    extension_for, Attachment, AttachmentCache, AttachmentLocation, AttachmentSink, FsSink, StoredAttachment,
};
pub use change::{fingerprint, fingerprint_value, ChangeCache, ChangeKey, ChangeMode, Fingerprint, Quantity};
