//! Process-wide attachment cache.
//!
//! Attachments embedded in world logs are decoded once, written under a
//! per-session directory and referenced by URL from then on. Entries are
//! write-once and live for the whole process; there is no eviction.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::AttachmentConfig;
use crate::error::{lock_err, ProjectionError, SyncResult};

/// An attachment as embedded in a world log: base64 payload plus media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Declared media type; may be empty.
    #[serde(default)]
    pub mime: String,
    /// Base64 payload, optionally as a `data:<mime>;base64,` URL.
    pub data: String,
}

impl Attachment {
    /// Attachment with a declared media type.
    #[must_use]
    pub fn new(mime: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            data: data.into(),
        }
    }
}

/// A persisted attachment as exposed to UI consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAttachment {
    /// Where observers fetch the file.
    pub url: String,
    /// Decoded size in bytes.
    pub length: usize,
    /// Effective media type.
    pub mime: String,
}

/// Destination for decoded attachment bytes.
pub trait AttachmentSink: Send + Sync {
    /// Persist `bytes` at `path`, creating parent directories as needed.
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

/// Writes attachments to the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSink;

impl AttachmentSink for FsSink {
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)
    }
}

/// Directory and URL prefix for one session's attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentLocation {
    /// Directory the files are written to.
    pub dir: PathBuf,
    /// URL prefix the directory is served under.
    pub hosting_root: String,
}

impl AttachmentLocation {
    /// Explicit directory and URL prefix.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, hosting_root: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            hosting_root: hosting_root.into(),
        }
    }

    /// `cache_dir/<session>` served at `hosting_root/<session>`.
    #[must_use]
    pub fn for_session(cfg: &AttachmentConfig, session_id: &str) -> Self {
        let session = sanitize(session_id);
        Self {
            dir: cfg.cache_dir.join(&session),
            hosting_root: format!("{}/{session}", cfg.hosting_root.trim_end_matches('/')),
        }
    }
}

/// File extension for a media type; `bin` when unknown.
#[must_use]
pub fn extension_for(mime: &str) -> &'static str {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        "application/pdf" => "pdf",
        "application/json" => "json",
        "application/zip" => "zip",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "text/html" => "html",
        "text/markdown" => "md",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "video/mp4" => "mp4",
        _ => "bin",
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Splits `data:<mime>;base64,<payload>`; plain payloads pass through.
fn split_data_url(data: &str) -> (Option<&str>, &str) {
    let Some(rest) = data.strip_prefix("data:") else {
        return (None, data);
    };
    match rest.split_once(',') {
        Some((header, payload)) => {
            let mime = header.split(';').next().filter(|m| !m.is_empty());
            (mime, payload)
        }
        None => (None, data),
    }
}

type AttachmentKey = (PathBuf, String, usize);

/// Cache of externalized attachments keyed by (directory, log id, attachment index).
///
/// Log ids are only unique within one session, so the session's directory is
/// part of the key.
pub struct AttachmentCache {
    entries: RwLock<HashMap<AttachmentKey, StoredAttachment>>,
    sink: Arc<dyn AttachmentSink>,
}

impl std::fmt::Debug for AttachmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentCache")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for AttachmentCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachmentCache {
    /// Cache backed by the local filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(Arc::new(FsSink))
    }

    /// Cache writing through a custom sink.
    #[must_use]
    pub fn with_sink(sink: Arc<dyn AttachmentSink>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Decode, persist and cache one attachment; cached entries are returned unchanged.
    ///
    /// No lock is held while decoding or writing.
    pub fn externalize(
        &self,
        location: &AttachmentLocation,
        log_id: &str,
        index: usize,
        attachment: &Attachment,
    ) -> SyncResult<StoredAttachment> {
        let key = (location.dir.clone(), log_id.to_string(), index);
        if let Some(hit) = self
            .entries
            .read()
            .map_err(|_| lock_err("attachments"))?
            .get(&key)
        {
            return Ok(hit.clone());
        }

        let (url_mime, payload) = split_data_url(&attachment.data);
        let mime = if attachment.mime.trim().is_empty() {
            url_mime.unwrap_or("application/octet-stream").to_string()
        } else {
            attachment.mime.clone()
        };

        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = BASE64_STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| ProjectionError::AttachmentDecode {
                log_id: log_id.to_string(),
                index,
                reason: e.to_string(),
            })?;

        let file_name = format!("{}_{index}.{}", sanitize(log_id), extension_for(&mime));
        let path = location.dir.join(&file_name);
        self.sink
            .write(&path, &bytes)
            .map_err(|source| ProjectionError::AttachmentWrite {
                log_id: log_id.to_string(),
                index,
                path: path.display().to_string(),
                source,
            })?;

        let stored = StoredAttachment {
            url: format!("{}/{file_name}", location.hosting_root.trim_end_matches('/')),
            length: bytes.len(),
            mime,
        };

        let mut entries = self.entries.write().map_err(|_| lock_err("attachments"))?;
        // A concurrent writer may have won the race; the first entry stays.
        Ok(entries.entry(key).or_insert(stored).clone())
    }

    /// Cached entry for `location`, if present.
    pub fn get(
        &self,
        location: &AttachmentLocation,
        log_id: &str,
        index: usize,
    ) -> SyncResult<Option<StoredAttachment>> {
        Ok(self
            .entries
            .read()
            .map_err(|_| lock_err("attachments"))?
            .get(&(location.dir.clone(), log_id.to_string(), index))
            .cloned())
    }

    /// Number of cached attachments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// True if nothing has been externalized yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
