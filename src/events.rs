//! Fan-out event delivery to UI-side subscribers.
//!
//! Services raise typed events from their worker thread; any number of
//! consumers subscribe and receive a clone of every event on a plain
//! `std::sync::mpsc` channel. Consumers choose how to drain it (poll from a
//! UI timer, block on a dedicated thread, ...). Subscribers whose receiver
//! was dropped are pruned on the next emit.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

/// Broadcast channel for one event type.
#[derive(Debug)]
pub struct EventBus<E> {
    subscribers: Mutex<Vec<Sender<E>>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Clone> EventBus<E> {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Only events emitted afterwards are seen.
    pub fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber.
    pub fn emit(&self, event: E) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers as of the last emit.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
