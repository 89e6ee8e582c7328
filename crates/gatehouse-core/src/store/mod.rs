//! Queue Store: durable, normalized access to the check-in queue blob.
//!
//! The queue is persisted as one JSON array under a single fixed key in an
//! injected [`BlobStore`]. Loading always normalizes what it finds
//! (malformed blobs recover to an empty queue, partial records get their
//! missing fields filled in, stale items are expired) and persists the
//! result back, so expiry is durable rather than recomputed on every read.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{dedup_key, ItemId, QueueItem, QueueStatus};
use crate::util::{normalize_text_option, unix_timestamp_ms};

/// Fixed storage key for the serialized queue blob.
pub const QUEUE_STORAGE_KEY: &str = "gatehouse.checkin.queue.v1";

/// Unresolved scans older than this are considered stale.
pub const QUEUE_TTL_MS: i64 = 48 * 60 * 60 * 1000;

const EXPIRED_MESSAGE: &str = "Expired (48 hours)";

/// Key-value blob storage scoped to one device.
///
/// Injected so business logic never touches ambient storage directly and
/// tests can substitute an in-memory implementation.
pub trait BlobStore {
    /// Read the blob stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the blob stored under `key` in a single write.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory store used by tests and ephemeral sessions.
///
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// File-backed store rooted at one directory, one file per key.
///
/// Writes go through a temp file and rename so no partial-write state is
/// observable to subsequent reads.
#[derive(Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(blob) => Ok(Some(blob)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path_for(key);
        let staged = target.with_extension("json.tmp");
        fs::write(&staged, value)?;
        fs::rename(&staged, &target)?;
        Ok(())
    }
}

/// Permissive mirror of [`QueueItem`] used while normalizing stored records.
#[derive(Deserialize)]
struct RawQueueItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    reservation_code: Option<String>,
    #[serde(default)]
    guest_name: Option<String>,
    #[serde(default)]
    scanned_at: Option<i64>,
    #[serde(default)]
    status: Option<QueueStatus>,
    #[serde(default)]
    last_error: Option<String>,
    #[serde(default)]
    override_reason: Option<String>,
    #[serde(default)]
    attempts: Option<u32>,
}

impl RawQueueItem {
    /// Fill in missing fields; records without a usable reservation code
    /// cannot be synced or keyed and are dropped.
    fn normalize(self, now_ms: i64) -> Option<QueueItem> {
        let reservation_code = normalize_text_option(self.reservation_code)?;
        let id = self
            .id
            .and_then(|raw| raw.parse::<ItemId>().ok())
            .unwrap_or_default();
        let key = normalize_text_option(self.key).unwrap_or_else(|| dedup_key(&reservation_code));

        Some(QueueItem {
            id,
            key,
            reservation_code,
            guest_name: normalize_text_option(self.guest_name),
            scanned_at: self.scanned_at.unwrap_or(now_ms),
            status: self.status.unwrap_or(QueueStatus::Queued),
            last_error: self.last_error,
            override_reason: self.override_reason,
            attempts: self.attempts.unwrap_or(0),
        })
    }
}

/// Durable access to the queue blob over an injected [`BlobStore`].
pub struct QueueStore<S> {
    store: S,
}

impl<S: BlobStore> QueueStore<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Load the queue, normalizing and expiring as needed.
    ///
    /// Never fails on malformed content: an unreadable blob yields an empty
    /// queue and individual records failing shape validation are dropped.
    /// The normalized result is persisted back before returning, so TTL
    /// transitions survive reloads.
    pub fn load(&self) -> Result<Vec<QueueItem>> {
        let now_ms = unix_timestamp_ms();
        let mut items = match self.store.get(QUEUE_STORAGE_KEY)? {
            Some(blob) => parse_queue_blob(&blob, now_ms),
            None => Vec::new(),
        };

        expire_stale(&mut items, now_ms);
        self.save(&items)?;
        Ok(items)
    }

    /// Serialize and persist the full list in a single write.
    pub fn save(&self, items: &[QueueItem]) -> Result<()> {
        let blob = serde_json::to_string(items)?;
        self.store.set(QUEUE_STORAGE_KEY, &blob)
    }
}

fn parse_queue_blob(blob: &str, now_ms: i64) -> Vec<QueueItem> {
    let Ok(serde_json::Value::Array(members)) = serde_json::from_str(blob) else {
        tracing::debug!("queue blob is not a JSON array; starting empty");
        return Vec::new();
    };

    let total = members.len();
    let items: Vec<QueueItem> = members
        .into_iter()
        .filter_map(|member| {
            serde_json::from_value::<RawQueueItem>(member)
                .ok()
                .and_then(|raw| raw.normalize(now_ms))
        })
        .collect();

    if items.len() < total {
        tracing::debug!(
            dropped = total - items.len(),
            "dropped queue records failing shape validation"
        );
    }
    items
}

/// Transition non-terminal items past the TTL window to `expired`.
///
/// Expired items stay in the store until explicitly removed, preserving an
/// audit trail of missed scans.
fn expire_stale(items: &mut [QueueItem], now_ms: i64) {
    for item in items {
        if !item.status.is_terminal() && now_ms.saturating_sub(item.scanned_at) > QUEUE_TTL_MS {
            item.status = QueueStatus::Expired;
            item.last_error = Some(EXPIRED_MESSAGE.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup() -> QueueStore<MemoryBlobStore> {
        QueueStore::new(MemoryBlobStore::new())
    }

    #[test]
    fn load_missing_blob_yields_empty_queue() {
        let store = setup();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn load_recovers_from_malformed_json() {
        let backing = MemoryBlobStore::new();
        backing.set(QUEUE_STORAGE_KEY, "{not json").unwrap();

        let store = QueueStore::new(backing);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn load_recovers_from_non_array_blob() {
        let backing = MemoryBlobStore::new();
        backing.set(QUEUE_STORAGE_KEY, "{\"queue\": []}").unwrap();

        let store = QueueStore::new(backing);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn load_drops_invalid_members_and_keeps_valid_ones() {
        let backing = MemoryBlobStore::new();
        backing
            .set(
                QUEUE_STORAGE_KEY,
                r#"[
                    {"reservation_code": "HR-1"},
                    {"guest_name": "No Code"},
                    42,
                    {"reservation_code": "   "}
                ]"#,
            )
            .unwrap();

        let store = QueueStore::new(backing);
        let items = store.load().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].reservation_code, "HR-1");
    }

    #[test]
    fn load_normalizes_partial_records() {
        let backing = MemoryBlobStore::new();
        backing
            .set(QUEUE_STORAGE_KEY, r#"[{"reservation_code": "HR-7"}]"#)
            .unwrap();

        let store = QueueStore::new(backing);
        let items = store.load().unwrap();
        assert_eq!(items.len(), 1);

        let item = &items[0];
        assert_eq!(item.key, "HR-7:checkin");
        assert_eq!(item.status, QueueStatus::Queued);
        assert_eq!(item.attempts, 0);
        assert!(item.scanned_at > 0);
    }

    #[test]
    fn load_expires_stale_items_durably() {
        let store = setup();
        let mut item = QueueItem::new("HR-OLD", None);
        item.scanned_at = unix_timestamp_ms() - QUEUE_TTL_MS - 1_000;
        store.save(&[item.clone()]).unwrap();

        let items = store.load().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, QueueStatus::Expired);
        assert_eq!(items[0].last_error.as_deref(), Some("Expired (48 hours)"));

        // Expiry was persisted, not just computed on read.
        let reloaded = store.load().unwrap();
        assert_eq!(reloaded[0].status, QueueStatus::Expired);
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn load_keeps_fresh_items_untouched() {
        let store = setup();
        let item = QueueItem::new("HR-FRESH", None);
        store.save(&[item.clone()]).unwrap();

        let items = store.load().unwrap();
        assert_eq!(items, vec![item]);
    }

    #[test]
    fn file_store_round_trips_and_reports_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());

        assert_eq!(store.get("absent").unwrap(), None);

        store.set(QUEUE_STORAGE_KEY, "[]").unwrap();
        assert_eq!(
            store.get(QUEUE_STORAGE_KEY).unwrap().as_deref(),
            Some("[]")
        );

        store.set(QUEUE_STORAGE_KEY, "[1]").unwrap();
        assert_eq!(
            store.get(QUEUE_STORAGE_KEY).unwrap().as_deref(),
            Some("[1]")
        );
    }

    #[test]
    fn memory_store_clones_share_state() {
        let store = MemoryBlobStore::new();
        let alias = store.clone();
        store.set("k", "v").unwrap();
        assert_eq!(alias.get("k").unwrap().as_deref(), Some("v"));
    }
}
