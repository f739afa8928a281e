use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

/// A bounded, single-producer-or-many / single-consumer FIFO queue with a drop-oldest overwrite
/// policy.
///
/// `put` never blocks and never fails: when the queue is at capacity the oldest element is
/// discarded to make room for the new one. This is the behavior appropriate for telemetry-style
/// topics where a slow consumer should never stall a publisher, and where the newest data is
/// always the most valuable.
///
/// `take` blocks (cooperatively, via `.await`) until an element is available. Dropping the
/// future returned by `take` before it resolves cancels the wait without consuming anything.
pub struct RingBuffer<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
}

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                capacity: capacity.max(1),
            }),
            notify: Notify::new(),
        }
    }

    /// Push `item`, dropping the oldest buffered item if the queue is already at capacity.
    pub fn put(&self, item: T) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.items.len() >= inner.capacity {
                inner.items.pop_front();
            }
            inner.items.push_back(item);
        }
        // Wake exactly one waiter; if none are waiting this is a no-op permit that the next
        // `take` will consume immediately.
        self.notify.notify_one();
    }

    /// Wait for and remove the oldest buffered item.
    ///
    /// Each buffered item is returned to exactly one caller of `take`.
    pub async fn take(&self) -> T {
        loop {
            // Register for notification before checking so a `put` racing with us can't be
            // missed between the check and the wait.
            let notified = self.notify.notified();
            if let Some(item) = self.inner.lock().unwrap().items.pop_front() {
                return item;
            }
            notified.await;
        }
    }

    /// Non-blocking attempt to take the oldest buffered item, if any.
    pub fn try_take(&self) -> Option<T> {
        self.inner.lock().unwrap().items.pop_front()
    }

    /// Adjust capacity at runtime. If the new capacity is smaller than the current size, the
    /// oldest elements are dropped until the queue fits.
    pub fn set_limit(&self, new_capacity: usize) {
        let mut inner = self.inner.lock().unwrap();
        let new_capacity = new_capacity.max(1);
        while inner.items.len() > new_capacity {
            inner.items.pop_front();
        }
        inner.capacity = new_capacity;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_try_take_is_fifo() {
        let q = RingBuffer::new(4);
        q.put(1);
        q.put(2);
        q.put(3);
        assert_eq!(q.try_take(), Some(1));
        assert_eq!(q.try_take(), Some(2));
        assert_eq!(q.try_take(), Some(3));
        assert_eq!(q.try_take(), None);
    }

    #[test]
    fn overflow_drops_oldest() {
        let q = RingBuffer::new(3);
        for i in 1..=5 {
            q.put(i);
        }
        // Capacity 3, produced 1..=5 with no consumer: contents should be exactly 3, 4, 5.
        assert_eq!(q.try_take(), Some(3));
        assert_eq!(q.try_take(), Some(4));
        assert_eq!(q.try_take(), Some(5));
        assert_eq!(q.try_take(), None);
    }

    #[test]
    fn set_limit_shrinks_by_dropping_oldest() {
        let q = RingBuffer::new(8);
        for i in 1..=6 {
            q.put(i);
        }
        q.set_limit(2);
        assert_eq!(q.try_take(), Some(5));
        assert_eq!(q.try_take(), Some(6));
        assert_eq!(q.try_take(), None);
    }

    #[tokio::test]
    async fn take_blocks_until_put() {
        let q = std::sync::Arc::new(RingBuffer::new(4));
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.take().await });
        // Give the task a chance to start waiting.
        tokio::task::yield_now().await;
        q.put(42);
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn take_is_exactly_once_per_element() {
        let q = std::sync::Arc::new(RingBuffer::new(4));
        q.put(1);
        q.put(2);
        let a = q.take().await;
        let b = q.take().await;
        assert_eq!((a, b), (1, 2));
    }
}
