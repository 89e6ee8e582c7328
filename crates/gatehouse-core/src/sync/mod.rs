//! Sync Engine: drains the check-in queue through the remote authority.
//!
//! One drain pass walks the queue sequentially and advances each item's
//! state from the authority's response. Items are never processed
//! concurrently: the authority's decision for a reservation must observe
//! any just-completed commit for the same reservation. The periodic trigger
//! lives in the application shell; the engine only exposes
//! [`SyncEngine::drain_once`].

pub mod authority;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::connectivity::Connectivity;
use crate::error::Result;
use crate::models::{QueueItem, QueueStatus};
use crate::queue::{CheckinQueue, QueuePatch};
use crate::store::BlobStore;

pub use authority::{
    AuthorityError, AuthorityResult, CheckinAuthority, CheckinDecision, HttpCheckinAuthority,
};

/// Failed sync attempts after which an item requires manual retry.
pub const MAX_SYNC_ATTEMPTS: u32 = 5;

/// How often the automatic drain fires while online.
pub const AUTO_DRAIN_INTERVAL: Duration = Duration::from_secs(10);

const MAX_ATTEMPTS_MESSAGE: &str = "Max attempts reached. Retry manually.";
const OVERRIDE_REQUIRED_MESSAGE: &str = "Override required";
const BLOCKED_MESSAGE: &str = "Check-in blocked";
const TRANSPORT_MESSAGE: &str = "Sync failed";

/// Aggregate counts for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Items committed remotely and removed from the queue.
    pub succeeded: usize,
    /// Items that recorded a failure this pass.
    pub failed: usize,
    /// Items parked awaiting an operator override reason.
    pub needs_reason: usize,
    /// Items skipped as ineligible (expired, capped, awaiting a reason).
    pub skipped: usize,
}

impl DrainSummary {
    /// How many items were actually taken through the authority.
    #[must_use]
    pub const fn processed(&self) -> usize {
        self.succeeded + self.failed + self.needs_reason
    }
}

/// What a drain invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// A full pass completed.
    Drained(DrainSummary),
    /// Another pass is already in flight; this trigger was dropped.
    Busy,
    /// The device is offline; no remote calls were made.
    Offline,
}

/// Drains queued check-ins through a [`CheckinAuthority`].
pub struct SyncEngine<S, A> {
    queue: CheckinQueue<S>,
    authority: A,
    connectivity: Connectivity,
    in_flight: AtomicBool,
}

impl<S: BlobStore, A: CheckinAuthority> SyncEngine<S, A> {
    pub fn new(store: S, authority: A, connectivity: Connectivity) -> Self {
        Self {
            queue: CheckinQueue::new(store),
            authority,
            connectivity,
            in_flight: AtomicBool::new(false),
        }
    }

    /// The queue this engine drains.
    pub const fn queue(&self) -> &CheckinQueue<S> {
        &self.queue
    }

    /// Run one drain pass over the current queue.
    ///
    /// Returns [`DrainOutcome::Offline`] without touching the network when
    /// the device is offline, and [`DrainOutcome::Busy`] when a pass is
    /// already in flight (the second trigger is dropped, not queued).
    pub async fn drain_once(&self) -> Result<DrainOutcome> {
        if !self.connectivity.is_online() {
            return Ok(DrainOutcome::Offline);
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Ok(DrainOutcome::Busy);
        }

        let result = self.drain_eligible().await;
        self.in_flight.store(false, Ordering::Release);
        result.map(DrainOutcome::Drained)
    }

    async fn drain_eligible(&self) -> Result<DrainSummary> {
        let snapshot = self.queue.items()?;
        let mut summary = DrainSummary::default();

        for item in snapshot {
            if !is_eligible(&item) {
                summary.skipped += 1;
                continue;
            }

            self.queue.patch(
                item.id,
                &QueuePatch::new()
                    .status(QueueStatus::Syncing)
                    .clear_last_error(),
            )?;

            match self.authority.validate(&item.reservation_code, true).await {
                Ok(Some(decision)) => self.resolve(&item, decision, &mut summary).await?,
                Ok(None) => {
                    self.record_failure(&item, "Reservation not found")?;
                    summary.failed += 1;
                }
                Err(error) => {
                    self.record_failure(&item, &transport_message(&error))?;
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Advance one item from the authority's validation decision.
    async fn resolve(
        &self,
        item: &QueueItem,
        decision: CheckinDecision,
        summary: &mut DrainSummary,
    ) -> Result<()> {
        if decision.allowed {
            return self
                .commit_and_remove(item, &decision.reservation_id, None, summary)
                .await;
        }

        if decision.can_override {
            if let Some(reason) = item.override_reason.clone() {
                return self
                    .commit_and_remove(item, &decision.reservation_id, Some(&reason), summary)
                    .await;
            }

            let mut patch = QueuePatch::new()
                .status(QueueStatus::NeedsReason)
                .last_error(OVERRIDE_REQUIRED_MESSAGE);
            if let Some(guest_name) = decision.guest_name {
                patch = patch.guest_name(guest_name);
            }
            self.queue.patch(item.id, &patch)?;
            summary.needs_reason += 1;
            tracing::debug!(code = %item.reservation_code, "check-in requires an override reason");
            return Ok(());
        }

        let message = decision
            .reason
            .unwrap_or_else(|| BLOCKED_MESSAGE.to_string());
        self.record_failure(item, &message)?;
        summary.failed += 1;
        Ok(())
    }

    async fn commit_and_remove(
        &self,
        item: &QueueItem,
        reservation_id: &str,
        override_reason: Option<&str>,
        summary: &mut DrainSummary,
    ) -> Result<()> {
        match self.authority.commit(reservation_id, override_reason).await {
            Ok(()) => {
                // Success has no persisted state: the item simply leaves the queue.
                self.queue.remove(item.id)?;
                summary.succeeded += 1;
                tracing::debug!(code = %item.reservation_code, "check-in committed");
            }
            Err(error) => {
                self.record_failure(item, &transport_message(&error))?;
                summary.failed += 1;
            }
        }
        Ok(())
    }

    /// Attempt-cap bookkeeping shared by every failure path.
    fn record_failure(&self, item: &QueueItem, message: &str) -> Result<()> {
        let attempts = item.attempts + 1;
        let message = if attempts >= MAX_SYNC_ATTEMPTS {
            MAX_ATTEMPTS_MESSAGE
        } else {
            message
        };

        self.queue.patch(
            item.id,
            &QueuePatch::new()
                .status(QueueStatus::Failed)
                .attempts(attempts)
                .last_error(message),
        )?;
        tracing::warn!(
            code = %item.reservation_code,
            attempts,
            error = message,
            "check-in sync attempt failed"
        );
        Ok(())
    }
}

/// Whether a drain pass should take this item to the authority.
fn is_eligible(item: &QueueItem) -> bool {
    match item.status {
        QueueStatus::Queued => true,
        QueueStatus::NeedsReason => item.override_reason.is_some(),
        QueueStatus::Failed => item.attempts < MAX_SYNC_ATTEMPTS,
        QueueStatus::Syncing | QueueStatus::Succeeded | QueueStatus::Expired => false,
    }
}

fn transport_message(error: &AuthorityError) -> String {
    let message = error.to_string();
    if message.trim().is_empty() {
        TRANSPORT_MESSAGE.to_string()
    } else {
        message
    }
}
