//! Bounded lock-free ring used on the hot paths.

use crossbeam_queue::ArrayQueue;

use weft_core::{Error, Result};

/// Bounded multi-producer multi-consumer ring.
///
/// Capacity must be a non-zero power of two. `push` refuses new items when
/// the ring is full and `pop` returns `None` when it is empty; callers on
/// the hot path treat both as backpressure signals, never as failures.
#[derive(Debug)]
pub struct MetricsRing<T> {
    queue: ArrayQueue<T>,
}

impl<T> MetricsRing<T> {
    /// Create a ring with the given power-of-two capacity.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(Error::invalid_argument(format!(
                "ring capacity must be a non-zero power of two, got {capacity}"
            )));
        }
        Ok(Self {
            queue: ArrayQueue::new(capacity),
        })
    }

    /// Append an item; returns false when the ring is full.
    pub fn push(&self, item: T) -> bool {
        self.queue.push(item).is_ok()
    }

    /// Append an item, evicting the oldest when the ring is full.
    pub fn push_evicting(&self, item: T) {
        let _ = self.queue.force_push(item);
    }

    /// Remove the oldest item; `None` when empty.
    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Drain every item currently in the ring, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.queue.len());
        while let Some(item) = self.queue.pop() {
            items.push(item);
        }
        items
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_must_be_power_of_two() {
        assert!(MetricsRing::<u32>::new(0).is_err());
        assert!(MetricsRing::<u32>::new(3).is_err());
        assert!(MetricsRing::<u32>::new(1_000).is_err());
        assert!(MetricsRing::<u32>::new(1_024).is_ok());
    }

    #[test]
    fn test_push_pop_fifo() {
        let ring = MetricsRing::new(4).unwrap();
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_push_refuses_when_full() {
        let ring = MetricsRing::new(2).unwrap();
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert!(!ring.push(3));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_push_evicting_drops_oldest() {
        let ring = MetricsRing::new(2).unwrap();
        ring.push_evicting(1);
        ring.push_evicting(2);
        ring.push_evicting(3);
        assert_eq!(ring.drain(), vec![2, 3]);
    }

    #[test]
    fn test_concurrent_producers_and_consumers() {
        use std::sync::Arc;

        let ring = Arc::new(MetricsRing::new(1_024).unwrap());
        let mut producers = Vec::new();
        for offset in 0..4u64 {
            let ring = Arc::clone(&ring);
            producers.push(std::thread::spawn(move || {
                for value in 0..100u64 {
                    while !ring.push(offset * 1_000 + value) {
                        std::thread::yield_now();
                    }
                }
            }));
        }
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(ring.len(), 400);
    }
}
