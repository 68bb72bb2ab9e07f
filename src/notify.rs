use async_trait::async_trait;
use tokio::sync::broadcast;

/// Post-debit balance fan-out, consumed by dashboards and session caches.
/// Delivery is best effort; a lost update never fails the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub account_id: String,
    pub balance: u32,
}

#[async_trait]
pub trait BalanceNotifier: Send + Sync {
    async fn balance_changed(&self, update: BalanceUpdate);
}

/// In-process fan-out over a tokio broadcast channel. Slow subscribers lag
/// and drop updates rather than backing up the sender.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<BalanceUpdate>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BalanceUpdate> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl BalanceNotifier for BroadcastNotifier {
    async fn balance_changed(&self, update: BalanceUpdate) {
        // Err means no live subscribers, which is normal.
        let _ = self.sender.send(update);
    }
}

/// Notifier that drops every update. Used when no consumer is wired up.
#[derive(Debug, Default)]
pub struct NullNotifier;

#[async_trait]
impl BalanceNotifier for NullNotifier {
    async fn balance_changed(&self, _update: BalanceUpdate) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_updates() {
        let notifier = BroadcastNotifier::default();
        let mut receiver = notifier.subscribe();
        notifier
            .balance_changed(BalanceUpdate {
                account_id: "acct_1".to_string(),
                balance: 47,
            })
            .await;
        let update = receiver.recv().await.unwrap();
        assert_eq!(update.account_id, "acct_1");
        assert_eq!(update.balance, 47);
    }

    #[tokio::test]
    async fn sending_without_subscribers_is_fine() {
        let notifier = BroadcastNotifier::default();
        notifier
            .balance_changed(BalanceUpdate {
                account_id: "acct_1".to_string(),
                balance: 0,
            })
            .await;
    }
}
