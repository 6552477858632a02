//! UI-to-worker command queues.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Mutex-guarded FIFO of pending commands.
///
/// Producers on any thread `push`; the service worker `drain`s once per
/// tick. Commands come out in push order.
#[derive(Debug)]
pub struct CommandQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> CommandQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command.
    pub fn push(&self, item: T) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item);
    }

    /// Take every queued command, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
