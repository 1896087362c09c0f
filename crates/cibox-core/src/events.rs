//! Observer lists for step notifications

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

/// Fan-out emitter backed by a list of unbounded channels
///
/// Cloning shares the subscriber list. Subscribers whose receiver has been
/// dropped are pruned on the next emit.
pub struct EventEmitter<T> {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<T>>>>,
}

impl<T: Clone> EventEmitter<T> {
    /// Create an emitter without subscribers
    pub fn new() -> Self {
        Self { subscribers: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().push(sender);
        receiver
    }

    /// Deliver an event to every live subscriber, returning how many received it
    pub fn emit(&self, event: &T) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        subscribers.len()
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<T>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T: Clone> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EventEmitter<T> {
    fn clone(&self) -> Self {
        Self { subscribers: Arc::clone(&self.subscribers) }
    }
}

impl<T> fmt::Debug for EventEmitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.subscribers.lock().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("EventEmitter").field("subscribers", &count).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_all_subscribers() {
        let emitter = EventEmitter::new();
        let mut first = emitter.subscribe();
        let mut second = emitter.clone().subscribe();

        assert_eq!(emitter.emit(&"started".to_string()), 2);
        assert_eq!(first.recv().await.unwrap(), "started");
        assert_eq!(second.recv().await.unwrap(), "started");
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let emitter: EventEmitter<u32> = EventEmitter::new();
        let receiver = emitter.subscribe();
        let _kept = emitter.subscribe();
        drop(receiver);

        assert_eq!(emitter.emit(&1), 1);
        assert_eq!(emitter.subscriber_count(), 1);
    }
}
