//! Live upload progress, keyed by a client-chosen session id.
//!
//! Publishing is fire-and-forget: an unknown or closed session is ignored.

use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;
use tracing::debug;

pub trait ProgressPublisher: Send + Sync {
    fn publish(&self, session_id: &str, percentage: f64);
}

/// Session id → live subscriber channel.
#[derive(Clone, Default)]
pub struct ProgressRegistry {
    sessions: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<f64>>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<mpsc::UnboundedSender<f64>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Register `sender` for `session_id`, replacing any earlier subscriber.
    pub fn set(&self, session_id: impl Into<String>, sender: mpsc::UnboundedSender<f64>) {
        self.sessions.write().insert(session_id.into(), sender);
    }

    pub fn delete(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a fresh channel for `session_id`. The registration is
    /// dropped together with the returned subscription.
    pub fn subscribe(&self, session_id: impl Into<String>) -> ProgressSubscription {
        let session_id = session_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.set(session_id.clone(), tx.clone());
        ProgressSubscription {
            session_id,
            registry: self.clone(),
            sender: tx,
            receiver: rx,
        }
    }
}

impl ProgressPublisher for ProgressRegistry {
    fn publish(&self, session_id: &str, percentage: f64) {
        if session_id.is_empty() {
            return;
        }
        let Some(sender) = self.get(session_id) else {
            return;
        };
        if sender.send(percentage).is_err() {
            debug!(session_id, "progress subscriber gone");
            self.delete(session_id);
        }
    }
}

pub struct ProgressSubscription {
    session_id: String,
    registry: ProgressRegistry,
    sender: mpsc::UnboundedSender<f64>,
    receiver: mpsc::UnboundedReceiver<f64>,
}

impl ProgressSubscription {
    pub async fn recv(&mut self) -> Option<f64> {
        self.receiver.recv().await
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        // A newer subscriber may have taken over the session id.
        let mut sessions = self.registry.sessions.write();
        if sessions
            .get(&self.session_id)
            .is_some_and(|current| current.same_channel(&self.sender))
        {
            sessions.remove(&self.session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_values() {
        let registry = ProgressRegistry::new();
        let mut sub = registry.subscribe("s1");

        registry.publish("s1", 25.0);
        registry.publish("s1", 100.0);
        registry.publish("other", 50.0);

        assert_eq!(sub.recv().await, Some(25.0));
        assert_eq!(sub.recv().await, Some(100.0));
    }

    #[test]
    fn dropping_subscription_unregisters_session() {
        let registry = ProgressRegistry::new();
        let sub = registry.subscribe("s1");
        assert!(registry.get("s1").is_some());
        drop(sub);
        assert!(registry.is_empty());
        registry.publish("s1", 10.0);
    }

    #[test]
    fn stale_subscription_keeps_newer_registration() {
        let registry = ProgressRegistry::new();
        let old = registry.subscribe("s1");
        let _new = registry.subscribe("s1");
        drop(old);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn closed_channel_is_removed_on_publish() {
        let registry = ProgressRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.set("s1", tx);
        drop(rx);
        registry.publish("s1", 1.0);
        assert!(registry.get("s1").is_none());
    }
}
