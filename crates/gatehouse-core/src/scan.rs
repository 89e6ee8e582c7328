//! Connectivity-aware scan routing and per-item operator actions.
//!
//! A scanned or typed reservation code goes straight to the remote
//! authority while online (with a fallback into the queue when transport
//! fails, so the attempt is never lost) and into the queue while offline.

use crate::connectivity::Connectivity;
use crate::error::{Error, Result};
use crate::models::{ItemId, QueueItem, QueueStatus};
use crate::queue::{CheckinQueue, EnqueueOutcome, QueuePatch};
use crate::store::BlobStore;
use crate::sync::{CheckinAuthority, DrainOutcome, SyncEngine};

/// What a submitted scan resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The check-in was committed against the remote authority.
    CheckedIn {
        reservation_code: String,
        guest_name: Option<String>,
        overridden: bool,
    },
    /// Offline: the scan was captured into the local queue.
    Queued(EnqueueOutcome),
    /// Transport failed on the direct path; captured into the queue instead.
    Deferred {
        outcome: EnqueueOutcome,
        error: String,
    },
    /// Blocked but overridable and no reason was supplied.
    OverrideRequired {
        reason: String,
        guest_name: Option<String>,
    },
    /// Blocked outright.
    Blocked { reason: String },
    /// The code does not resolve to a reservation.
    NotFound,
}

/// Front-desk scan surface: routes scans and exposes the per-item
/// operator actions on the queue.
pub struct ScanSurface<S, A> {
    queue: CheckinQueue<S>,
    authority: A,
    connectivity: Connectivity,
    engine: SyncEngine<S, A>,
}

impl<S, A> ScanSurface<S, A>
where
    S: BlobStore + Clone,
    A: CheckinAuthority + Clone,
{
    pub fn new(store: S, authority: A, connectivity: Connectivity) -> Self {
        Self {
            queue: CheckinQueue::new(store.clone()),
            engine: SyncEngine::new(store, authority.clone(), connectivity.clone()),
            authority,
            connectivity,
        }
    }

    pub const fn queue(&self) -> &CheckinQueue<S> {
        &self.queue
    }

    pub const fn engine(&self) -> &SyncEngine<S, A> {
        &self.engine
    }

    /// Route one scanned/typed reservation code.
    pub async fn submit(
        &self,
        reservation_code: &str,
        override_reason: Option<&str>,
    ) -> Result<ScanOutcome> {
        let code = reservation_code.trim();
        if code.is_empty() {
            return Err(Error::InvalidInput(
                "Reservation code cannot be empty".to_string(),
            ));
        }

        if !self.connectivity.is_online() {
            let outcome = self.queue.enqueue(code, override_reason)?;
            return Ok(ScanOutcome::Queued(outcome));
        }

        match self.authority.validate(code, false).await {
            Ok(None) => Ok(ScanOutcome::NotFound),
            Ok(Some(decision)) => {
                if decision.allowed {
                    self.commit_direct(code, &decision.reservation_id, None, decision.guest_name)
                        .await
                } else if decision.can_override {
                    match override_reason {
                        Some(reason) => {
                            self.commit_direct(
                                code,
                                &decision.reservation_id,
                                Some(reason),
                                decision.guest_name,
                            )
                            .await
                        }
                        None => Ok(ScanOutcome::OverrideRequired {
                            reason: decision
                                .reason
                                .unwrap_or_else(|| "Check-in blocked".to_string()),
                            guest_name: decision.guest_name,
                        }),
                    }
                } else {
                    Ok(ScanOutcome::Blocked {
                        reason: decision
                            .reason
                            .unwrap_or_else(|| "Check-in blocked".to_string()),
                    })
                }
            }
            Err(error) => self.defer(code, override_reason, &error.to_string()),
        }
    }

    async fn commit_direct(
        &self,
        code: &str,
        reservation_id: &str,
        override_reason: Option<&str>,
        guest_name: Option<String>,
    ) -> Result<ScanOutcome> {
        match self.authority.commit(reservation_id, override_reason).await {
            Ok(()) => Ok(ScanOutcome::CheckedIn {
                reservation_code: code.to_string(),
                guest_name,
                overridden: override_reason.is_some(),
            }),
            Err(error) => self.defer(code, override_reason, &error.to_string()),
        }
    }

    /// Capture an attempt the direct path could not finish.
    fn defer(
        &self,
        code: &str,
        override_reason: Option<&str>,
        error: &str,
    ) -> Result<ScanOutcome> {
        tracing::warn!(code, error, "direct check-in failed; queueing for sync");
        let outcome = self.queue.enqueue(code, override_reason)?;
        Ok(ScanOutcome::Deferred {
            outcome,
            error: error.to_string(),
        })
    }

    /// Attach an operator justification to a queued item, then drain.
    pub async fn supply_reason(&self, id: ItemId, reason: &str) -> Result<DrainOutcome> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::InvalidInput(
                "Override reason cannot be empty".to_string(),
            ));
        }

        self.queue
            .patch(id, &QueuePatch::new().override_reason(reason))?;
        self.engine.drain_once().await
    }

    /// Reset a failed item for another round of attempts, then drain.
    pub async fn retry(&self, id: ItemId) -> Result<DrainOutcome> {
        self.queue.patch(
            id,
            &QueuePatch::new()
                .status(QueueStatus::Queued)
                .attempts(0)
                .clear_last_error(),
        )?;
        self.engine.drain_once().await
    }

    /// Remove an item from the queue; returns the remaining items.
    pub fn remove(&self, id: ItemId) -> Result<Vec<QueueItem>> {
        self.queue.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;
    use crate::sync::MAX_SYNC_ATTEMPTS;
    use crate::testing::{allowed_decision, blocked_decision, ScriptedAuthority};
    use pretty_assertions::assert_eq;

    fn setup(online: bool) -> (ScanSurface<MemoryBlobStore, ScriptedAuthority>, ScriptedAuthority) {
        let authority = ScriptedAuthority::new();
        let surface = ScanSurface::new(
            MemoryBlobStore::new(),
            authority.clone(),
            Connectivity::new(online),
        );
        (surface, authority)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_scan_enqueues_without_remote_calls() {
        let (surface, authority) = setup(false);

        let outcome = surface.submit("HR-20260208-AAAA", None).await.unwrap();
        let ScanOutcome::Queued(enqueued) = outcome else {
            panic!("expected the scan to be queued");
        };
        assert!(!enqueued.deduped);
        assert!(authority.calls().is_empty());
        assert_eq!(surface.queue().items().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_rescan_reports_dedup() {
        let (surface, _authority) = setup(false);

        surface.submit("HR-1", None).await.unwrap();
        let outcome = surface.submit("HR-1", None).await.unwrap();
        let ScanOutcome::Queued(enqueued) = outcome else {
            panic!("expected the scan to be queued");
        };
        assert!(enqueued.deduped);
        assert_eq!(surface.queue().items().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn online_allowed_scan_commits_directly() {
        let (surface, authority) = setup(true);
        authority.push_decision(allowed_decision("HR-OK"));

        let outcome = surface.submit("HR-OK", None).await.unwrap();
        assert_eq!(
            outcome,
            ScanOutcome::CheckedIn {
                reservation_code: "HR-OK".to_string(),
                guest_name: None,
                overridden: false,
            }
        );
        assert!(surface.queue().items().unwrap().is_empty());
        assert_eq!(
            authority.calls(),
            vec![
                "validate:HR-OK:direct".to_string(),
                "commit:res-HR-OK:none".to_string(),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn online_transport_failure_falls_back_to_queue() {
        let (surface, authority) = setup(true);
        authority.push_transport_error("connection refused");

        let outcome = surface.submit("HR-NET", None).await.unwrap();
        let ScanOutcome::Deferred { outcome, error } = outcome else {
            panic!("expected the scan to be deferred");
        };
        assert!(!outcome.deduped);
        assert!(error.contains("connection refused"));

        let items = surface.queue().items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, QueueStatus::Queued);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn online_commit_failure_preserves_reason_in_queue() {
        let (surface, authority) = setup(true);
        authority.push_decision(blocked_decision("HR-OV", true, Some("Early check-in"), None));
        authority.fail_commits_with("gateway timeout");

        let outcome = surface.submit("HR-OV", Some("manager approved")).await.unwrap();
        assert!(matches!(outcome, ScanOutcome::Deferred { .. }));

        let items = surface.queue().items().unwrap();
        assert_eq!(items[0].override_reason.as_deref(), Some("manager approved"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn online_overridable_block_without_reason_gives_feedback() {
        let (surface, authority) = setup(true);
        authority.push_decision(blocked_decision(
            "HR-EARLY",
            true,
            Some("Early check-in"),
            Some("Guest Two"),
        ));

        let outcome = surface.submit("HR-EARLY", None).await.unwrap();
        assert_eq!(
            outcome,
            ScanOutcome::OverrideRequired {
                reason: "Early check-in".to_string(),
                guest_name: Some("Guest Two".to_string()),
            }
        );
        // Immediate feedback only; nothing entered the queue.
        assert!(surface.queue().items().unwrap().is_empty());
        assert_eq!(authority.calls().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn online_overridable_block_with_reason_commits() {
        let (surface, authority) = setup(true);
        authority.push_decision(blocked_decision("HR-OV2", true, Some("Early check-in"), None));

        let outcome = surface.submit("HR-OV2", Some("manager approved")).await.unwrap();
        assert!(matches!(
            outcome,
            ScanOutcome::CheckedIn {
                overridden: true,
                ..
            }
        ));
        assert_eq!(
            authority.calls().last().unwrap(),
            "commit:res-HR-OV2:manager approved"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn online_hard_block_and_not_found_do_not_queue() {
        let (surface, authority) = setup(true);
        authority.push_decision(blocked_decision(
            "HR-NO",
            false,
            Some("Payment required before check-in"),
            None,
        ));
        authority.push_not_found();

        let blocked = surface.submit("HR-NO", None).await.unwrap();
        assert_eq!(
            blocked,
            ScanOutcome::Blocked {
                reason: "Payment required before check-in".to_string()
            }
        );

        let missing = surface.submit("HR-GHOST", None).await.unwrap();
        assert_eq!(missing, ScanOutcome::NotFound);
        assert!(surface.queue().items().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn submit_rejects_blank_codes() {
        let (surface, _authority) = setup(true);
        assert!(surface.submit("   ", None).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn supply_reason_drains_the_parked_item() {
        let (surface, authority) = setup(true);

        // Park the item via a drain that reports an overridable block.
        authority.push_transport_error("offline-ish");
        let deferred = surface.submit("HR-PARK", None).await.unwrap();
        let ScanOutcome::Deferred { outcome, .. } = deferred else {
            panic!("expected the scan to be deferred");
        };

        authority.push_decision(blocked_decision("HR-PARK", true, Some("Early check-in"), None));
        surface.engine().drain_once().await.unwrap();
        assert_eq!(
            surface.queue().items().unwrap()[0].status,
            QueueStatus::NeedsReason
        );

        authority.push_decision(blocked_decision("HR-PARK", true, Some("Early check-in"), None));
        surface
            .supply_reason(outcome.item.id, "manager approved")
            .await
            .unwrap();

        assert!(surface.queue().items().unwrap().is_empty());
        assert_eq!(
            authority.calls().last().unwrap(),
            "commit:res-HR-PARK:manager approved"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn supply_reason_rejects_blank_text() {
        let (surface, _authority) = setup(true);
        assert!(surface.supply_reason(ItemId::new(), "  ").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_resets_a_capped_item_and_drains() {
        let (surface, authority) = setup(true);
        authority.push_transport_error("down");
        let deferred = surface.submit("HR-RETRY", None).await.unwrap();
        let ScanOutcome::Deferred { outcome, .. } = deferred else {
            panic!("expected the scan to be deferred");
        };

        surface
            .queue()
            .patch(
                outcome.item.id,
                &QueuePatch::new()
                    .status(QueueStatus::Failed)
                    .attempts(MAX_SYNC_ATTEMPTS)
                    .last_error("Max attempts reached. Retry manually."),
            )
            .unwrap();

        authority.push_decision(allowed_decision("HR-RETRY"));
        surface.retry(outcome.item.id).await.unwrap();
        assert!(surface.queue().items().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_deletes_the_item() {
        let (surface, _authority) = setup(false);
        let queued = surface.submit("HR-DROP", None).await.unwrap();
        let ScanOutcome::Queued(outcome) = queued else {
            panic!("expected the scan to be queued");
        };

        let remaining = surface.remove(outcome.item.id).unwrap();
        assert!(remaining.is_empty());
    }
}
