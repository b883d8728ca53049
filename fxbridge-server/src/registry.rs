//! Connected client registry
//!
//! Tracks the outbound channel of every connected WebSocket client and fans
//! server messages out to all of them. Each connection task owns the actual
//! socket; the registry only holds the sending half of its message queue,
//! so broadcasting never blocks on a slow client.
//!
//! The registry is self-healing: a member whose receiver has gone away
//! (connection task exited) is removed during the next broadcast that
//! targets it.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use fxbridge_protocol::ServerMessage;

/// Registry of connected client channels
#[derive(Debug, Default)]
pub struct ClientRegistry {
    /// Outbound queues keyed by an internal connection id
    clients: DashMap<Uuid, mpsc::UnboundedSender<ServerMessage>>,
}

impl ClientRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client's outbound channel, returning its connection id
    pub fn register(&self, tx: mpsc::UnboundedSender<ServerMessage>) -> Uuid {
        let id = Uuid::new_v4();
        self.clients.insert(id, tx);
        debug!(client = %id, total = self.clients.len(), "Client registered");
        id
    }

    /// Remove a client; idempotent no-op if it is already gone
    pub fn remove(&self, id: Uuid) {
        if self.clients.remove(&id).is_some() {
            debug!(client = %id, total = self.clients.len(), "Client removed");
        }
    }

    /// Broadcast a message to every registered client.
    ///
    /// Returns the number of clients the message was queued for. Members
    /// whose channel is closed are dropped from the registry; the broadcast
    /// continues to the remaining members.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.clients.iter() {
            if entry.value().send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*entry.key());
            }
        }

        for id in dead {
            debug!(client = %id, "Dropping closed client from registry");
            self.clients.remove(&id);
        }

        trace!(
            kind = message.type_name(),
            delivered,
            "Broadcast to clients"
        );
        delivered
    }

    /// Number of currently registered clients
    pub fn count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdout_msg(data: &str) -> ServerMessage {
        ServerMessage::Stdout {
            data: data.to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let registry = ClientRegistry::new();
        assert_eq!(registry.count(), 0);

        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.register(tx);
        assert_eq!(registry.count(), 1);

        registry.remove(id);
        assert_eq!(registry.count(), 0);

        // Removing again is a no-op
        registry.remove(id);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_open_clients() {
        let registry = ClientRegistry::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register(tx1);
        registry.register(tx2);

        let delivered = registry.broadcast(&stdout_msg("hello\n"));
        assert_eq!(delivered, 2);

        assert_eq!(rx1.recv().await, Some(stdout_msg("hello\n")));
        assert_eq!(rx2.recv().await, Some(stdout_msg("hello\n")));
    }

    #[tokio::test]
    async fn test_broadcast_removes_dead_clients() {
        let registry = ClientRegistry::new();

        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        registry.register(tx_dead);
        registry.register(tx_live);

        // Simulate an abruptly closed connection
        drop(rx_dead);

        let delivered = registry.broadcast(&stdout_msg("still here\n"));
        assert_eq!(delivered, 1);
        assert_eq!(registry.count(), 1);
        assert_eq!(rx_live.recv().await, Some(stdout_msg("still here\n")));
    }

    #[tokio::test]
    async fn test_broadcast_with_no_clients_is_harmless() {
        let registry = ClientRegistry::new();
        assert_eq!(registry.broadcast(&stdout_msg("nobody\n")), 0);
    }

    #[tokio::test]
    async fn test_clients_joining_later_miss_earlier_broadcasts() {
        let registry = ClientRegistry::new();

        let (tx_early, mut rx_early) = mpsc::unbounded_channel();
        registry.register(tx_early);
        registry.broadcast(&stdout_msg("first\n"));

        let (tx_late, mut rx_late) = mpsc::unbounded_channel();
        registry.register(tx_late);
        registry.broadcast(&stdout_msg("second\n"));

        assert_eq!(rx_early.recv().await, Some(stdout_msg("first\n")));
        assert_eq!(rx_early.recv().await, Some(stdout_msg("second\n")));
        // Late joiner only sees messages broadcast after it registered
        assert_eq!(rx_late.recv().await, Some(stdout_msg("second\n")));
        assert!(rx_late.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_broadcast_and_churn() {
        use std::sync::Arc;

        let registry = Arc::new(ClientRegistry::new());

        let broadcaster = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    registry.broadcast(&stdout_msg(&format!("line {}\n", i)));
                    tokio::task::yield_now().await;
                }
            })
        };

        let churner = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let id = registry.register(tx);
                    tokio::task::yield_now().await;
                    drop(rx);
                    registry.remove(id);
                }
            })
        };

        broadcaster.await.unwrap();
        churner.await.unwrap();
        assert_eq!(registry.count(), 0);
    }
}
