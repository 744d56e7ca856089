use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::warn;

/// A write that has not reached the durable store yet.
#[derive(Debug, Clone)]
pub struct PendingWrite<V> {
    pub key: String,
    pub value: V,
    pub queued_at: Instant,
}

/// Bounded FIFO of pending writes.
///
/// A full buffer never blocks: pushing evicts the oldest pending write and
/// hands it back to the caller. A key has at most one pending write; writing
/// it again replaces the value and keeps its queue position.
#[derive(Debug)]
pub struct WriteBuffer<V> {
    capacity: usize,
    queue: Mutex<VecDeque<PendingWrite<V>>>,
}

impl<V: Clone> WriteBuffer<V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Queues a write. Returns the evicted entry when the buffer was full.
    pub fn push(&self, key: impl Into<String>, value: V) -> Option<PendingWrite<V>> {
        let key = key.into();
        let mut queue = self.lock();

        if let Some(existing) = queue.iter_mut().find(|w| w.key == key) {
            existing.value = value;
            return None;
        }

        let evicted = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        if let Some(ref dropped) = evicted {
            warn!(
                "Write buffer full (capacity={}), dropped oldest pending write for key={}",
                self.capacity, dropped.key
            );
        }

        queue.push_back(PendingWrite {
            key,
            value,
            queued_at: Instant::now(),
        });
        evicted
    }

    /// Latest pending value for `key`.
    pub fn pending(&self, key: &str) -> Option<V> {
        self.lock()
            .iter()
            .find(|w| w.key == key)
            .map(|w| w.value.clone())
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let mut queue = self.lock();
        let position = queue.iter().position(|w| w.key == key)?;
        queue.remove(position).map(|w| w.value)
    }

    /// Takes every pending write, oldest first.
    pub fn drain(&self) -> Vec<PendingWrite<V>> {
        self.lock().drain(..).collect()
    }

    /// Puts writes that failed to flush back at the front of the queue.
    ///
    /// Keys rewritten since the drain keep their newer value. Entries that no
    /// longer fit are dropped, oldest first.
    pub fn requeue_front(&self, writes: Vec<PendingWrite<V>>) {
        let mut queue = self.lock();
        for write in writes.into_iter().rev() {
            if queue.iter().any(|w| w.key == write.key) {
                continue;
            }
            queue.push_front(write);
        }
        while queue.len() > self.capacity {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    "Write buffer full (capacity={}), dropped requeued write for key={}",
                    self.capacity, dropped.key
                );
            }
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PendingWrite<V>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
