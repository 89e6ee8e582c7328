//! Data models

mod queue_item;

pub use queue_item::{dedup_key, merge_rescan, ItemId, QueueItem, QueueStatus};
