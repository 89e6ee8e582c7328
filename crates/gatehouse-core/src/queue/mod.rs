//! Queue Mutators: business operations on the check-in queue.
//!
//! Every operation is read-entire-queue, transform, write-entire-queue over
//! the [`QueueStore`]; callers serialize their own calls (the UI triggers
//! one mutation per operator action and the drain loop awaits each remote
//! call before proceeding).

use crate::error::Result;
use crate::models::{dedup_key, merge_rescan, ItemId, QueueItem, QueueStatus};
use crate::store::{BlobStore, QueueStore};

/// Maximum number of items the queue will hold.
pub const QUEUE_CAPACITY: usize = 100;

/// What an enqueue call did, so the operator can be told about dedup
/// merges ("already queued, updated timestamp") and capacity evictions
/// ("queue limit reached, removed N oldest").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// The created or merged item.
    pub item: QueueItem,
    /// True when an existing live item for the same key was merged.
    pub deduped: bool,
    /// How many oldest items were evicted to stay within capacity.
    pub evicted: usize,
}

/// Fields to shallow-merge into a queue item.
///
/// Built with chained setters; unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct QueuePatch {
    status: Option<QueueStatus>,
    last_error: Option<Option<String>>,
    override_reason: Option<Option<String>>,
    guest_name: Option<String>,
    attempts: Option<u32>,
}

impl QueuePatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn status(mut self, status: QueueStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn last_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(Some(message.into()));
        self
    }

    #[must_use]
    pub fn clear_last_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    #[must_use]
    pub fn override_reason(mut self, reason: impl Into<String>) -> Self {
        self.override_reason = Some(Some(reason.into()));
        self
    }

    #[must_use]
    pub fn guest_name(mut self, name: impl Into<String>) -> Self {
        self.guest_name = Some(name.into());
        self
    }

    #[must_use]
    pub const fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    fn apply(&self, item: &mut QueueItem) {
        if let Some(status) = self.status {
            item.status = status;
        }
        if let Some(last_error) = &self.last_error {
            item.last_error = last_error.clone();
        }
        if let Some(override_reason) = &self.override_reason {
            item.override_reason = override_reason.clone();
        }
        if let Some(guest_name) = &self.guest_name {
            item.guest_name = Some(guest_name.clone());
        }
        if let Some(attempts) = self.attempts {
            item.attempts = attempts;
        }
    }
}

/// Business operations over the persisted check-in queue.
pub struct CheckinQueue<S> {
    store: QueueStore<S>,
}

impl<S: BlobStore> CheckinQueue<S> {
    pub const fn new(store: S) -> Self {
        Self {
            store: QueueStore::new(store),
        }
    }

    /// Current queue contents (normalized and expiry-applied).
    pub fn items(&self) -> Result<Vec<QueueItem>> {
        self.store.load()
    }

    /// Queue a check-in attempt for `reservation_code`.
    ///
    /// An existing live item for the same dedup key is merged instead of
    /// duplicated; either way the item ends up at the front of the list
    /// and the capacity bound is enforced afterwards.
    pub fn enqueue(
        &self,
        reservation_code: &str,
        override_reason: Option<&str>,
    ) -> Result<EnqueueOutcome> {
        let mut items = self.store.load()?;
        let key = dedup_key(reservation_code);

        let existing = items
            .iter()
            .position(|item| item.key == key && !item.status.is_terminal());

        let (item, deduped) = match existing {
            Some(position) => {
                let live = items.remove(position);
                (merge_rescan(&live, override_reason), true)
            }
            None => (
                QueueItem::new(reservation_code, override_reason.map(str::to_string)),
                false,
            ),
        };

        items.insert(0, item.clone());
        let evicted = enforce_capacity(&mut items);
        self.store.save(&items)?;

        if deduped {
            tracing::debug!(code = %item.reservation_code, "merged re-scan into queued item");
        }
        Ok(EnqueueOutcome {
            item,
            deduped,
            evicted,
        })
    }

    /// Shallow-merge `patch` into the item with the given `id`.
    ///
    /// A missing id is a no-op; the new full list is returned either way.
    pub fn patch(&self, id: ItemId, patch: &QueuePatch) -> Result<Vec<QueueItem>> {
        let mut items = self.store.load()?;
        if let Some(item) = items.iter_mut().find(|item| item.id == id) {
            patch.apply(item);
        }
        self.store.save(&items)?;
        Ok(items)
    }

    /// Remove the item with the given `id`; a missing id is a no-op.
    pub fn remove(&self, id: ItemId) -> Result<Vec<QueueItem>> {
        let mut items = self.store.load()?;
        items.retain(|item| item.id != id);
        self.store.save(&items)?;
        Ok(items)
    }
}

/// Evict oldest-by-`scanned_at` items until the queue fits the capacity.
fn enforce_capacity(items: &mut Vec<QueueItem>) -> usize {
    let mut evicted = 0;
    while items.len() > QUEUE_CAPACITY {
        let Some(oldest) = items
            .iter()
            .enumerate()
            .min_by_key(|(_, item)| item.scanned_at)
            .map(|(position, _)| position)
        else {
            break;
        };
        items.remove(oldest);
        evicted += 1;
    }
    evicted
}
