//! Server-push trigger notifications (§4.F, GLOSSARY "Trigger").
//!
//! A client registers interest in a collection (`SetTrigger`); after any
//! committed write touching that collection, every registered
//! connection for that collection is sent an uncorrelated
//! `NotifyTrigger` frame. Registration is per connection: closing a
//! connection implicitly unregisters it.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A per-connection handle a `TriggerRegistry` notification is sent to.
pub type TriggerSender = mpsc::UnboundedSender<String>;

/// Tracks which connections are listening for which collections' commits.
#[derive(Default)]
pub struct TriggerRegistry {
    inner: Mutex<HashMap<String, Vec<(u64, TriggerSender)>>>,
}

impl TriggerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `connection_id`'s interest in `collection`, via
    /// `SetTrigger`.
    pub fn set(&self, collection: &str, connection_id: u64, sender: TriggerSender) {
        let mut inner = self.inner.lock();
        let subscribers = inner.entry(collection.to_string()).or_default();
        if !subscribers.iter().any(|(id, _)| *id == connection_id) {
            subscribers.push((connection_id, sender));
        }
    }

    /// Removes `connection_id`'s interest in `collection`, via
    /// `UnsetTrigger`.
    pub fn unset(&self, collection: &str, connection_id: u64) {
        let mut inner = self.inner.lock();
        if let Some(subscribers) = inner.get_mut(collection) {
            subscribers.retain(|(id, _)| *id != connection_id);
        }
    }

    /// Removes every registration for `connection_id` across all
    /// collections, called on connection close.
    pub fn remove_connection(&self, connection_id: u64) {
        let mut inner = self.inner.lock();
        for subscribers in inner.values_mut() {
            subscribers.retain(|(id, _)| *id != connection_id);
        }
    }

    /// Notifies every connection registered for `collection` that a
    /// commit just touched it. Dead senders (closed connections that
    /// hadn't yet been explicitly unregistered) are pruned.
    pub fn fire(&self, collection: &str) {
        let mut inner = self.inner.lock();
        if let Some(subscribers) = inner.get_mut(collection) {
            subscribers.retain(|(_, sender)| sender.send(collection.to_string()).is_ok());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_notifies_every_registered_connection() {
        let registry = TriggerRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.set("docs", 1, tx1);
        registry.set("docs", 2, tx2);

        registry.fire("docs");

        assert_eq!(rx1.try_recv().unwrap(), "docs");
        assert_eq!(rx2.try_recv().unwrap(), "docs");
    }

    #[test]
    fn unset_stops_further_notifications() {
        let registry = TriggerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.set("docs", 1, tx);
        registry.unset("docs", 1);
        registry.fire("docs");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn remove_connection_clears_every_collection() {
        let registry = TriggerRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.set("a", 1, tx.clone());
        registry.set("b", 1, tx);
        registry.remove_connection(1);
        registry.fire("a");
        registry.fire("b");
        // no panic and no subscribers left; re-firing is a no-op.
    }
}
