//! Per-session change detection.
//!
//! Key invariants:
//! - Logically identical content fingerprints identically across polls,
//!   regardless of map iteration order in the producer.
//! - Entries of one session are guarded by that session's own lock, so
//!   concurrent workers on different sessions never contend.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use blake3::Hasher;
use serde::Serialize;
use serde_json::Value;

use crate::error::{lock_err, SyncResult};

/// A tracked state slice.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    EventLog,
    AppsState,
    ScheduledEvents,
    Clock,
    Hints,
    WorldLogs,
}

impl Quantity {
    /// Wire name of the quantity.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EventLog => "event_log",
            Self::AppsState => "apps_state",
            Self::ScheduledEvents => "scheduled_events",
            Self::Clock => "clock",
            Self::Hints => "hints",
            Self::WorldLogs => "world_logs",
        }
    }
}

/// Cache key within one session: a quantity plus an optional scope suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeKey {
    quantity: Quantity,
    suffix: Option<String>,
}

impl ChangeKey {
    /// Unscoped key.
    #[must_use]
    pub const fn new(quantity: Quantity) -> Self {
        Self {
            quantity,
            suffix: None,
        }
    }

    /// Key isolated under `suffix`, usually a subscription id.
    #[must_use]
    pub fn scoped(quantity: Quantity, suffix: impl Into<String>) -> Self {
        Self {
            quantity,
            suffix: Some(suffix.into()),
        }
    }

    /// The tracked quantity.
    #[must_use]
    pub const fn quantity(&self) -> Quantity {
        self.quantity
    }

    /// Scope suffix, if scoped.
    #[must_use]
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }
}

impl fmt::Display for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.suffix {
            Some(s) => write!(f, "{}:{s}", self.quantity.as_str()),
            None => f.write_str(self.quantity.as_str()),
        }
    }
}

/// How a quantity is compared against its cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeMode {
    /// Compare the raw value.
    Scalar,
    /// Compare only the element count. For append-only sequences.
    LengthOnly,
    /// Compare a deterministic content fingerprint.
    #[default]
    ContentHash,
}

/// Deterministic content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(blake3::Hash);

impl Fingerprint {
    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.0.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.to_hex().as_str())
    }
}

/// Fingerprint any serializable value.
///
/// The value is first lowered to a JSON tree, then hashed with object keys
/// visited in sorted order. Hash maps in the producer therefore never
/// perturb the result.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> SyncResult<Fingerprint> {
    let tree = serde_json::to_value(value)?;
    Ok(fingerprint_value(&tree))
}

/// Fingerprint a JSON tree.
#[must_use]
pub fn fingerprint_value(value: &Value) -> Fingerprint {
    let mut h = Hasher::new();
    hash_canonical(&mut h, value);
    Fingerprint(h.finalize())
}

fn hash_canonical(h: &mut Hasher, value: &Value) {
    match value {
        Value::Null => {
            h.update(b"n");
        }
        Value::Bool(b) => {
            h.update(if *b { b"t" } else { b"f" });
        }
        Value::Number(n) => {
            let s = n.to_string();
            h.update(b"#");
            h.update(&(s.len() as u64).to_le_bytes());
            h.update(s.as_bytes());
        }
        Value::String(s) => {
            h.update(b"s");
            h.update(&(s.len() as u64).to_le_bytes());
            h.update(s.as_bytes());
        }
        Value::Array(items) => {
            h.update(b"[");
            h.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                hash_canonical(h, item);
            }
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            h.update(b"{");
            h.update(&(keys.len() as u64).to_le_bytes());
            for k in keys {
                h.update(&(k.len() as u64).to_le_bytes());
                h.update(k.as_bytes());
                if let Some(v) = map.get(k) {
                    hash_canonical(h, v);
                }
            }
        }
    }
}

fn value_len(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        Value::String(s) => s.len(),
        Value::Bool(_) | Value::Number(_) => 1,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Cached {
    Scalar(Value),
    Length(usize),
    Hash(Fingerprint),
}

type SessionEntries = HashMap<ChangeKey, Cached>;

/// Fingerprint store keyed by session id and [`ChangeKey`].
#[derive(Debug, Default)]
pub struct ChangeCache {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionEntries>>>>,
}

impl ChangeCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` and report whether it differs from the last recorded one.
    ///
    /// A key with no prior value always reports a change.
    pub fn update(&self, session_id: &str, key: &ChangeKey, value: &Value, mode: ChangeMode) -> SyncResult<bool> {
        let observed = match mode {
            ChangeMode::Scalar => Cached::Scalar(value.clone()),
            ChangeMode::LengthOnly => Cached::Length(value_len(value)),
            ChangeMode::ContentHash => Cached::Hash(fingerprint_value(value)),
        };
        self.record(session_id, key, observed)
    }

    /// `LengthOnly` update for a count the caller already knows.
    pub fn observe_len(&self, session_id: &str, key: &ChangeKey, len: usize) -> SyncResult<bool> {
        self.record(session_id, key, Cached::Length(len))
    }

    /// `ContentHash` update for any serializable value.
    pub fn observe_content<T: Serialize + ?Sized>(&self, session_id: &str, key: &ChangeKey, value: &T) -> SyncResult<bool> {
        let fp = fingerprint(value)?;
        self.record(session_id, key, Cached::Hash(fp))
    }

    /// Last value stored under `Scalar` mode, if any.
    pub fn last_scalar(&self, session_id: &str, key: &ChangeKey) -> SyncResult<Option<Value>> {
        let Some(entries) = self.session(session_id)? else {
            return Ok(None);
        };
        let guard = entries.lock().map_err(|_| lock_err("change_cache.session"))?;
        Ok(match guard.get(key) {
            Some(Cached::Scalar(v)) => Some(v.clone()),
            _ => None,
        })
    }

    /// Drop every entry of a session.
    ///
    /// Entries are emptied in place, so a writer already holding the session's
    /// map cannot resurrect stale fingerprints.
    pub fn clear(&self, session_id: &str) -> SyncResult<()> {
        let Some(entries) = self.session(session_id)? else {
            return Ok(());
        };
        entries.lock().map_err(|_| lock_err("change_cache.session"))?.clear();
        drop(entries);
        self.prune(session_id)
    }

    /// Drop the entries of a session that carry the given suffix.
    pub fn clear_scope(&self, session_id: &str, suffix: &str) -> SyncResult<()> {
        let Some(entries) = self.session(session_id)? else {
            return Ok(());
        };
        entries
            .lock()
            .map_err(|_| lock_err("change_cache.session"))?
            .retain(|k, _| k.suffix() != Some(suffix));
        drop(entries);
        self.prune(session_id)
    }

    /// Remove a session's map once it is empty and nobody else holds it.
    fn prune(&self, session_id: &str) -> SyncResult<()> {
        let mut sessions = self.sessions.write().map_err(|_| lock_err("change_cache"))?;
        // New holders only appear under this lock, so the count cannot grow here.
        let idle = sessions.get(session_id).map_or(false, |e| {
            Arc::strong_count(e) == 1 && e.lock().map(|g| g.is_empty()).unwrap_or(false)
        });
        if idle {
            sessions.remove(session_id);
        }
        Ok(())
    }

    /// Number of sessions with at least one entry.
    pub fn tracked_sessions(&self) -> SyncResult<usize> {
        let sessions = self.sessions.read().map_err(|_| lock_err("change_cache"))?;
        let mut total = 0;
        for entries in sessions.values() {
            if !entries.lock().map_err(|_| lock_err("change_cache.session"))?.is_empty() {
                total += 1;
            }
        }
        Ok(total)
    }

    fn session(&self, session_id: &str) -> SyncResult<Option<Arc<Mutex<SessionEntries>>>> {
        Ok(self
            .sessions
            .read()
            .map_err(|_| lock_err("change_cache"))?
            .get(session_id)
            .cloned())
    }

    fn session_or_insert(&self, session_id: &str) -> SyncResult<Arc<Mutex<SessionEntries>>> {
        if let Some(entries) = self.session(session_id)? {
            return Ok(entries);
        }
        let mut sessions = self.sessions.write().map_err(|_| lock_err("change_cache"))?;
        Ok(Arc::clone(
            sessions.entry(session_id.to_string()).or_default(),
        ))
    }

    fn record(&self, session_id: &str, key: &ChangeKey, observed: Cached) -> SyncResult<bool> {
        let entries = self.session_or_insert(session_id)?;
        let mut guard = entries.lock().map_err(|_| lock_err("change_cache.session"))?;
        let changed = guard.get(key) != Some(&observed);
        if changed {
            guard.insert(key.clone(), observed);
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn identical_polls_report_change_once() {
        let cache = ChangeCache::new();
        let key = ChangeKey::new(Quantity::EventLog);
        let value = json!([{"event_id": "a"}, {"event_id": "b"}]);

        let results: Vec<bool> = (0..5)
            .map(|_| cache.update("s", &key, &value, ChangeMode::ContentHash).unwrap())
            .collect();
        assert_eq!(results, vec![true, false, false, false, false]);
    }

    #[test]
    fn distinct_values_both_report_change() {
        for mode in [ChangeMode::Scalar, ChangeMode::ContentHash] {
            let cache = ChangeCache::new();
            let key = ChangeKey::new(Quantity::Hints);
            assert!(cache.update("s", &key, &json!("a"), mode).unwrap());
            assert!(cache.update("s", &key, &json!("b"), mode).unwrap());
        }
    }

    #[test]
    fn length_only_tracks_growth_and_shrink() {
        let cache = ChangeCache::new();
        let key = ChangeKey::new(Quantity::WorldLogs);
        assert!(cache.update("s", &key, &json!([1]), ChangeMode::LengthOnly).unwrap());
        assert!(!cache.update("s", &key, &json!([2]), ChangeMode::LengthOnly).unwrap());
        assert!(cache.update("s", &key, &json!([1, 2]), ChangeMode::LengthOnly).unwrap());
        assert!(!cache.update("s", &key, &json!([1, 2]), ChangeMode::LengthOnly).unwrap());
        assert!(cache.update("s", &key, &json!([]), ChangeMode::LengthOnly).unwrap());
        assert!(cache.observe_len("s", &key, 3).unwrap());
        assert!(!cache.observe_len("s", &key, 3).unwrap());
    }

    #[test]
    fn fingerprint_ignores_map_order() {
        let mut a = HashMap::new();
        let mut b = HashMap::new();
        for i in 0..64 {
            a.insert(format!("k{i}"), i);
        }
        for i in (0..64).rev() {
            b.insert(format!("k{i}"), i);
        }
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
        assert_ne!(fingerprint(&json!({"x": 1})).unwrap(), fingerprint(&json!({"x": 2})).unwrap());
    }

    #[test]
    fn fingerprint_separates_nested_shapes() {
        let flat = fingerprint_value(&json!(["ab", "c"]));
        let split = fingerprint_value(&json!(["a", "bc"]));
        assert_ne!(flat, split);
        assert_ne!(fingerprint_value(&json!(null)), fingerprint_value(&json!([])));
    }

    #[test]
    fn sessions_and_scopes_are_isolated() {
        let cache = ChangeCache::new();
        let a = ChangeKey::scoped(Quantity::Clock, "sub-a");
        let b = ChangeKey::scoped(Quantity::Clock, "sub-b");

        assert!(cache.update("s1", &a, &json!(1.0), ChangeMode::Scalar).unwrap());
        assert!(cache.update("s1", &b, &json!(1.0), ChangeMode::Scalar).unwrap());
        assert!(cache.update("s2", &a, &json!(1.0), ChangeMode::Scalar).unwrap());
        assert!(!cache.update("s1", &a, &json!(1.0), ChangeMode::Scalar).unwrap());

        cache.clear_scope("s1", "sub-a").unwrap();
        assert!(cache.update("s1", &a, &json!(1.0), ChangeMode::Scalar).unwrap());
        assert!(!cache.update("s1", &b, &json!(1.0), ChangeMode::Scalar).unwrap());
        assert_eq!(cache.last_scalar("s1", &b).unwrap(), Some(json!(1.0)));
    }

    #[test]
    fn clear_forces_resend() {
        let cache = ChangeCache::new();
        let key = ChangeKey::new(Quantity::AppsState);
        let v = json!({"files": ["a.txt"]});
        assert!(cache.update("s", &key, &v, ChangeMode::ContentHash).unwrap());
        assert!(!cache.update("s", &key, &v, ChangeMode::ContentHash).unwrap());
        cache.clear("s").unwrap();
        assert_eq!(cache.tracked_sessions().unwrap(), 0);
        assert!(cache.update("s", &key, &v, ChangeMode::ContentHash).unwrap());
    }

    #[test]
    fn clearing_last_scope_drops_session() {
        let cache = ChangeCache::new();
        let key = ChangeKey::scoped(Quantity::Hints, "only");
        cache.update("s", &key, &json!([]), ChangeMode::ContentHash).unwrap();
        assert_eq!(cache.tracked_sessions().unwrap(), 1);
        cache.clear_scope("s", "only").unwrap();
        assert_eq!(cache.tracked_sessions().unwrap(), 0);
    }

    #[test]
    fn clear_reaches_a_writer_holding_the_session_map() {
        let cache = ChangeCache::new();
        let key = ChangeKey::scoped(Quantity::EventLog, "sub");
        let v = json!([{"event_id": "a"}]);
        assert!(cache.update("s", &key, &v, ChangeMode::ContentHash).unwrap());

        // A writer that looked the map up before the clear.
        let held = cache.session("s").unwrap().unwrap();
        cache.clear("s").unwrap();
        assert!(held.lock().unwrap().is_empty());
        assert_eq!(cache.tracked_sessions().unwrap(), 0);

        // The held map is still the live one, so the next write is seen by everyone.
        let live = cache.session("s").unwrap().unwrap();
        assert!(Arc::ptr_eq(&held, &live));
        held.lock().unwrap().insert(key.clone(), Cached::Hash(fingerprint_value(&v)));
        assert!(!cache.update("s", &key, &v, ChangeMode::ContentHash).unwrap());

        drop((held, live));
        cache.clear_scope("s", "sub").unwrap();
        assert!(cache.session("s").unwrap().is_none());
    }

    #[test]
    fn key_display() {
        assert_eq!(ChangeKey::new(Quantity::EventLog).to_string(), "event_log");
        assert_eq!(ChangeKey::scoped(Quantity::Clock, "x").to_string(), "clock:x");
    }
}
