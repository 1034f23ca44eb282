//! In-memory mailboxes and online markers.
//!
//! One [`Mailboxes`] is built at startup and shared by every connection
//! handler. All state sits behind a single mutex that is only held for map
//! work, never across network I/O.

use courier_types::{Envelope, Identity};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Process-unique token for one accepted relay connection.
pub type ConnectionId = u64;

#[derive(Debug, Default)]
struct MailboxState {
    /// Undelivered mail per recipient, in arrival order.
    queues: HashMap<Identity, VecDeque<Envelope>>,
    /// Which connection currently holds each identity's online marker.
    online: HashMap<Identity, ConnectionId>,
}

/// Shared mailbox store for the relay.
#[derive(Debug, Default)]
pub struct Mailboxes {
    state: Mutex<MailboxState>,
}

impl Mailboxes {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `connection`.
    ///
    /// Creates the mailbox if needed and takes over the online marker; a
    /// previous holder simply loses it.
    pub async fn register(&self, identity: Identity, connection: ConnectionId) {
        let mut state = self.state.lock().await;
        state.queues.entry(identity).or_default();
        if let Some(previous) = state.online.insert(identity, connection) {
            if previous != connection {
                tracing::debug!(
                    "Online marker for {:?} moved from connection {} to {}",
                    identity,
                    previous,
                    connection
                );
            }
        }
    }

    /// Append one message to `recipient`'s queue, creating it if needed.
    ///
    /// Returns the queue length after the append.
    pub async fn deposit(&self, recipient: Identity, sender: Identity, payload: Vec<u8>) -> usize {
        let mut state = self.state.lock().await;
        let queue = state.queues.entry(recipient).or_default();
        queue.push_back(Envelope::new(sender, payload));
        queue.len()
    }

    /// Take every queued message for `identity`, leaving the queue empty.
    pub async fn drain(&self, identity: &Identity) -> Vec<Envelope> {
        let mut state = self.state.lock().await;
        match state.queues.get_mut(identity) {
            Some(queue) => queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Clear `identity`'s online marker if `connection` still holds it.
    ///
    /// Returns `true` if the marker was cleared.
    pub async fn go_offline(&self, identity: &Identity, connection: ConnectionId) -> bool {
        let mut state = self.state.lock().await;
        if state.online.get(identity) == Some(&connection) {
            state.online.remove(identity);
            true
        } else {
            false
        }
    }

    /// Whether some live connection is registered as `identity`.
    pub async fn is_online(&self, identity: &Identity) -> bool {
        self.state.lock().await.online.contains_key(identity)
    }

    /// Number of identities with a live registered connection.
    pub async fn online_count(&self) -> usize {
        self.state.lock().await.online.len()
    }

    /// Number of messages waiting for `identity`.
    pub async fn pending(&self, identity: &Identity) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(identity)
            .map_or(0, VecDeque::len)
    }

    /// Snapshot of store-wide counts.
    pub async fn stats(&self) -> MailboxStats {
        let state = self.state.lock().await;
        MailboxStats {
            online_identities: state.online.len(),
            mailboxes: state.queues.len(),
            queued_messages: state.queues.values().map(VecDeque::len).sum(),
        }
    }
}

/// Counts reported by health and metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStats {
    /// Identities with a live registered connection.
    pub online_identities: usize,
    /// Mailboxes that exist, empty or not.
    pub mailboxes: usize,
    /// Messages waiting across all mailboxes.
    pub queued_messages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn drain_returns_send_order_then_empty() {
        let mailboxes = Mailboxes::new();
        let a = Identity::random();
        let b = Identity::random();

        mailboxes.register(a, 1).await;
        mailboxes.deposit(a, b, b"m1".to_vec()).await;
        mailboxes.deposit(a, b, b"m2".to_vec()).await;

        assert_eq!(
            mailboxes.drain(&a).await,
            vec![Envelope::new(b, b"m1".to_vec()), Envelope::new(b, b"m2".to_vec())]
        );
        assert!(mailboxes.drain(&a).await.is_empty());
    }

    #[tokio::test]
    async fn mail_for_unknown_recipient_is_held() {
        let mailboxes = Mailboxes::new();
        let stranger = Identity::random();

        assert_eq!(
            mailboxes
                .deposit(stranger, Identity::ANONYMOUS, b"early".to_vec())
                .await,
            1
        );
        assert!(!mailboxes.is_online(&stranger).await);

        mailboxes.register(stranger, 7).await;
        let mail = mailboxes.drain(&stranger).await;
        assert_eq!(mail.len(), 1);
        assert!(mail[0].sender.is_anonymous());
    }

    #[tokio::test]
    async fn register_does_not_clear_existing_mail() {
        let mailboxes = Mailboxes::new();
        let a = Identity::random();

        mailboxes
            .deposit(a, Identity::ANONYMOUS, b"queued".to_vec())
            .await;
        mailboxes.register(a, 1).await;
        assert_eq!(mailboxes.pending(&a).await, 1);
    }

    #[tokio::test]
    async fn stale_connection_cannot_clear_newer_marker() {
        let mailboxes = Mailboxes::new();
        let a = Identity::random();

        mailboxes.register(a, 1).await;
        mailboxes.register(a, 2).await;

        assert!(!mailboxes.go_offline(&a, 1).await);
        assert!(mailboxes.is_online(&a).await);

        assert!(mailboxes.go_offline(&a, 2).await);
        assert!(!mailboxes.is_online(&a).await);
        assert_eq!(mailboxes.online_count().await, 0);
    }

    #[tokio::test]
    async fn stats_count_everything() {
        let mailboxes = Mailboxes::new();
        let a = Identity::random();
        let b = Identity::random();

        mailboxes.register(a, 1).await;
        mailboxes.deposit(b, a, vec![1]).await;
        mailboxes.deposit(b, a, vec![2]).await;

        assert_eq!(
            mailboxes.stats().await,
            MailboxStats {
                online_identities: 1,
                mailboxes: 2,
                queued_messages: 2,
            }
        );
    }

    #[tokio::test]
    async fn concurrent_sends_racing_fetches_are_delivered_exactly_once() {
        let mailboxes = Arc::new(Mailboxes::new());
        let recipient = Identity::random();
        mailboxes.register(recipient, 1).await;

        let mut senders = Vec::new();
        for s in 0..8u8 {
            let mailboxes = mailboxes.clone();
            senders.push(tokio::spawn(async move {
                for i in 0..50u8 {
                    mailboxes
                        .deposit(recipient, Identity::new([s + 1; 32]), vec![s, i])
                        .await;
                    tokio::task::yield_now().await;
                }
            }));
        }

        let fetcher = {
            let mailboxes = mailboxes.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..100 {
                    seen.extend(mailboxes.drain(&recipient).await);
                    tokio::task::yield_now().await;
                }
                seen
            })
        };

        for sender in senders {
            sender.await.unwrap();
        }
        let mut seen = fetcher.await.unwrap();
        seen.extend(mailboxes.drain(&recipient).await);

        assert_eq!(seen.len(), 8 * 50);
        let mut payloads: Vec<_> = seen.iter().map(|e| e.payload.clone()).collect();
        payloads.sort();
        payloads.dedup();
        assert_eq!(payloads.len(), 8 * 50);

        // Per-sender order survives interleaving.
        for s in 0..8u8 {
            let order: Vec<u8> = seen
                .iter()
                .filter(|e| e.payload[0] == s)
                .map(|e| e.payload[1])
                .collect();
            assert_eq!(order, (0..50).collect::<Vec<_>>());
        }
    }
}
