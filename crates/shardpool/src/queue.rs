//! Bounded queue with async waits
//!
//! Backs both the free list and the pending-release list of a partition.
//! Items always enter at the back; [`ServiceOrder`] decides which end
//! callers take from. Maintenance walks use [`BoundedQueue::pop_oldest`]
//! regardless of the configured order.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::ServiceOrder;

pub(crate) struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    order: ServiceOrder,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize, order: ServiceOrder) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            order,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Take an item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        let mut items = self.items.lock();
        let item = match self.order {
            ServiceOrder::Fifo => items.pop_front(),
            ServiceOrder::Lifo => items.pop_back(),
        };
        self.after_pop(&items, item.is_some());
        item
    }

    /// Take the item that has been queued the longest.
    pub fn pop_oldest(&self) -> Option<T> {
        let mut items = self.items.lock();
        let item = items.pop_front();
        self.after_pop(&items, item.is_some());
        item
    }

    /// Wait until an item is available and take it.
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    /// Add an item without waiting; hands it back when the queue is full.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Wait for room and add the item.
    pub async fn push(&self, mut item: T) {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(item) {
                Ok(()) => return,
                Err(rejected) => item = rejected,
            }
            notified.await;
        }
    }

    /// Wait for room and add the item, unless `cancel` resolves first.
    ///
    /// A cancelled push hands the item back.
    pub async fn push_unless<F: Future>(&self, mut item: T, cancel: F) -> Result<(), T> {
        tokio::pin!(cancel);
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(rejected) => item = rejected,
            }
            tokio::select! {
                _ = notified => {}
                _ = &mut cancel => return Err(item),
            }
        }
    }

    /// Remove every queued item.
    pub fn drain(&self) -> Vec<T> {
        let drained: Vec<T> = self.items.lock().drain(..).collect();
        if !drained.is_empty() {
            self.not_full.notify_waiters();
        }
        drained
    }

    // Chain wake-ups so a single notify_one never strands a second waiter
    fn after_pop(&self, remaining: &VecDeque<T>, popped: bool) {
        if !popped {
            return;
        }
        self.not_full.notify_one();
        if !remaining.is_empty() {
            self.not_empty.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_fifo_and_lifo_order() {
        let fifo = BoundedQueue::new(3, ServiceOrder::Fifo);
        let lifo = BoundedQueue::new(3, ServiceOrder::Lifo);
        for i in 0..3 {
            fifo.try_push(i).unwrap();
            lifo.try_push(i).unwrap();
        }

        assert_eq!(fifo.try_pop(), Some(0));
        assert_eq!(lifo.try_pop(), Some(2));
        assert_eq!(lifo.pop_oldest(), Some(0));
    }

    #[test]
    fn test_try_push_rejects_when_full() {
        let queue = BoundedQueue::new(1, ServiceOrder::Fifo);
        queue.try_push("a").unwrap();
        assert_eq!(queue.try_push("b"), Err("b"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_empties_queue() {
        let queue = BoundedQueue::new(4, ServiceOrder::Fifo);
        queue.try_push(1).unwrap();
        queue.try_push(2).unwrap();
        assert_eq!(queue.drain(), vec![1, 2]);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(BoundedQueue::new(1, ServiceOrder::Fifo));
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.pop().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.try_push(7).unwrap();
        assert_eq!(waiter.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_push_waits_for_room() {
        let queue = Arc::new(BoundedQueue::new(1, ServiceOrder::Fifo));
        queue.try_push(1).unwrap();

        let pusher = tokio::spawn({
            let queue = queue.clone();
            async move { queue.push(2).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pusher.is_finished());

        assert_eq!(queue.try_pop(), Some(1));
        pusher.await.unwrap();
        assert_eq!(queue.try_pop(), Some(2));
    }

    #[tokio::test]
    async fn test_cancelled_push_returns_item() {
        let queue = BoundedQueue::new(1, ServiceOrder::Fifo);
        queue.try_push(1).unwrap();

        let cancel = tokio::time::sleep(Duration::from_millis(10));
        assert_eq!(queue.push_unless(2, cancel).await, Err(2));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.push_unless(3, std::future::pending::<()>()).await, Ok(()));
        assert_eq!(queue.try_pop(), Some(3));
    }
}
