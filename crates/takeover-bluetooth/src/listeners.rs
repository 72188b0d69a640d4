//! Fan-out of adapter events to per-request subscribers.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Set of live subscribers for one kind of adapter event.
///
/// Each subscriber owns its receiver; closed receivers are pruned on the
/// next broadcast or count.
#[derive(Debug)]
pub struct ListenerSet<T> {
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<T>>>>,
}

impl<T> Clone for ListenerSet<T> {
    fn clone(&self) -> Self {
        Self {
            senders: Arc::clone(&self.senders),
        }
    }
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            senders: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> ListenerSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    /// Deliver `event` to every live subscriber.
    pub fn broadcast(&self, event: T) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Number of subscribers whose receiver is still alive.
    pub fn count(&self) -> usize {
        match self.senders.lock() {
            Ok(mut senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let set = ListenerSet::new();
        let mut a = set.subscribe();
        let mut b = set.subscribe();

        set.broadcast(7u32);

        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let set: ListenerSet<u32> = ListenerSet::new();
        let a = set.subscribe();
        let _b = set.subscribe();
        assert_eq!(set.count(), 2);

        drop(a);
        assert_eq!(set.count(), 1);
    }
}
