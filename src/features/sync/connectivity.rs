//! Connectivity signal.
//!
//! The platform (or the CLI) reports online/offline transitions here; the
//! delivery driver subscribes and starts a pass when the link comes back.

use tokio::sync::watch;
use tracing::info;

/// Shared online/offline flag with change notification.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Create a monitor with an initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Report that the network is reachable.
    pub fn set_online(&self) {
        self.set(true);
    }

    /// Report that the network is unreachable.
    pub fn set_offline(&self) {
        self.set(false);
    }

    fn set(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }

    /// Current state.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver that wakes on every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_changes() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.is_online());

        monitor.set_online();
        assert!(monitor.is_online());

        monitor.set_offline();
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions_only() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.set_offline();
        assert!(!rx.has_changed().unwrap());

        monitor.set_online();
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }
}
