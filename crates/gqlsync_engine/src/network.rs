//! Online/offline status shared by the outbox and delta syncs.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared network status. Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkStatus {
    /// Creates a status with the given initial value.
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Returns true when online.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Updates the status. Returns true if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        })
    }

    /// Watches status changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Waits until online.
    pub async fn online(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|online| *online).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_online_reports_changes() {
        let status = NetworkStatus::new(false);
        assert!(!status.is_online());
        assert!(status.set_online(true));
        assert!(!status.set_online(true));
        assert!(status.clone().is_online());
    }

    #[tokio::test]
    async fn online_resolves_after_transition() {
        let status = NetworkStatus::new(false);
        let waiter = tokio::spawn({
            let status = status.clone();
            async move { status.online().await }
        });
        status.set_online(true);
        waiter.await.unwrap();
    }
}
