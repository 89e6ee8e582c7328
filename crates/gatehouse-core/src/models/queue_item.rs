//! Check-in queue item model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::util::unix_timestamp_ms;

/// A unique identifier for a queue item, using UUID v7 (time-sortable)
///
/// Used only for local addressing; never sent to the remote authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Create a new unique item ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a queued check-in attempt
///
/// `Succeeded` is a momentary internal signal: a successful commit removes
/// the item from the queue, so the state is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Syncing,
    Succeeded,
    Failed,
    NeedsReason,
    Expired,
}

impl QueueStatus {
    /// Terminal states are never picked up by a sync pass again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Expired)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Syncing => "syncing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::NeedsReason => "needs_reason",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the dedup key for a reservation code.
///
/// At most one non-terminal queue item may exist per key.
#[must_use]
pub fn dedup_key(reservation_code: &str) -> String {
    format!("{}:checkin", reservation_code.trim())
}

/// One pending or resolved check-in attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique local identifier
    pub id: ItemId,
    /// Business identity used for deduplication
    pub key: String,
    /// Scanned or typed reservation code
    pub reservation_code: String,
    /// Display hint, populated opportunistically from validation responses
    pub guest_name: Option<String>,
    /// Timestamp of the most recent (re-)scan (Unix ms); drives TTL and eviction
    pub scanned_at: i64,
    /// Current lifecycle state
    pub status: QueueStatus,
    /// Human-readable reason for the current non-success state
    pub last_error: Option<String>,
    /// Operator justification for a policy override
    pub override_reason: Option<String>,
    /// Failed remote sync attempts so far
    pub attempts: u32,
}

impl QueueItem {
    /// Create a fresh queued item for the given reservation code.
    #[must_use]
    pub fn new(reservation_code: impl Into<String>, override_reason: Option<String>) -> Self {
        let reservation_code = reservation_code.into().trim().to_string();
        Self {
            id: ItemId::new(),
            key: dedup_key(&reservation_code),
            reservation_code,
            guest_name: None,
            scanned_at: unix_timestamp_ms(),
            status: QueueStatus::Queued,
            last_error: None,
            override_reason,
            attempts: 0,
        }
    }
}

/// Fold a re-scan of the same reservation code into an existing live item.
///
/// Refreshes `scanned_at` and clears `last_error`. An existing
/// `needs_reason` status survives only when neither the re-scan nor the
/// item carries an override reason; in every other case the item goes back
/// to `queued` with zeroed attempts so the next drain picks it up.
#[must_use]
pub fn merge_rescan(existing: &QueueItem, incoming_reason: Option<&str>) -> QueueItem {
    let override_reason = incoming_reason
        .map(str::to_string)
        .or_else(|| existing.override_reason.clone());

    let (status, attempts) =
        if override_reason.is_none() && existing.status == QueueStatus::NeedsReason {
            (QueueStatus::NeedsReason, existing.attempts)
        } else {
            (QueueStatus::Queued, 0)
        };

    QueueItem {
        id: existing.id,
        key: existing.key.clone(),
        reservation_code: existing.reservation_code.clone(),
        guest_name: existing.guest_name.clone(),
        scanned_at: unix_timestamp_ms(),
        status,
        last_error: None,
        override_reason,
        attempts,
    }
}
