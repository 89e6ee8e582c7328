//! Online/offline tracking fed by platform connectivity signals.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared online/offline flag with transition notifications.
///
/// The platform shell feeds [`Connectivity::set_online`] from whatever
/// signal it has (network change events, a probe, a flag); consumers read
/// the current flag or subscribe to transitions.
#[derive(Clone)]
pub struct Connectivity {
    sender: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        let (sender, _receiver) = watch::channel(initially_online);
        Self {
            sender: Arc::new(sender),
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Record a connectivity transition; no-op when the state is unchanged.
    pub fn set_online(&self, online: bool) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "connectivity changed");
        }
    }

    /// Subscribe to online/offline transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_current_state() {
        let connectivity = Connectivity::new(false);
        assert!(!connectivity.is_online());

        connectivity.set_online(true);
        assert!(connectivity.is_online());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribers_see_transitions() {
        let connectivity = Connectivity::new(true);
        let mut transitions = connectivity.subscribe();

        connectivity.set_online(false);
        transitions.changed().await.unwrap();
        assert!(!*transitions.borrow_and_update());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unchanged_state_does_not_notify() {
        let connectivity = Connectivity::new(true);
        let mut transitions = connectivity.subscribe();

        connectivity.set_online(true);
        assert!(!transitions.has_changed().unwrap());
    }
}
