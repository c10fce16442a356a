//! FIFO of commands waiting for the dispatcher.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::protocol::Command;

/// Outbound command queue of one session.
///
/// Producers push from any task; the session's dispatcher is the only
/// consumer.
#[derive(Default)]
pub struct CommandQueue {
    items: Mutex<VecDeque<Command>>,
    notify: Notify,
}

impl CommandQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<Command>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a command and wakes the dispatcher.
    pub fn push(&self, command: Command) {
        self.items().push_back(command);
        self.notify.notify_one();
    }

    /// Removes the command at the head.
    pub fn pop(&self) -> Option<Command> {
        self.items().pop_front()
    }

    /// Returns the number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items().len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Returns a copy of the queued commands, head first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Command> {
        self.items().iter().cloned().collect()
    }

    /// Drops every queued command.
    pub fn clear(&self) {
        self.items().clear();
    }

    /// Resolves once a push happened since the last wakeup.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = CommandQueue::new();
        queue.push(Command::GetBattery);
        queue.push(Command::GetFirmware);
        queue.push(Command::GetSettings);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(Command::GetBattery));
        assert_eq!(queue.pop(), Some(Command::GetFirmware));
        assert_eq!(queue.pop(), Some(Command::GetSettings));
        assert_eq!(queue.pop(), None);
    }

    #[tokio::test]
    async fn test_push_before_wait_is_not_lost() {
        let queue = CommandQueue::new();
        queue.push(Command::GetBattery);

        tokio::time::timeout(std::time::Duration::from_millis(100), queue.notified())
            .await
            .unwrap();
        assert_eq!(queue.pop(), Some(Command::GetBattery));
    }

    #[tokio::test]
    async fn test_concurrent_push_and_drain() {
        let queue = Arc::new(CommandQueue::new());

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    for i in 0..50 {
                        queue.push(Command::Raw(format!("{p}:{i}")));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let mut drained = Vec::new();
        while drained.len() < 200 {
            match queue.pop() {
                Some(command) => drained.push(command),
                None => tokio::task::yield_now().await,
            }
        }
        for producer in producers {
            producer.await.unwrap();
        }

        assert!(queue.is_empty());
        drained.sort_by_key(Command::encode);
        drained.dedup();
        assert_eq!(drained.len(), 200);
    }
}
