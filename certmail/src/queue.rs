//! Shared work queue for the sender pool.
//!
//! A plain FIFO behind a mutex. Workers hold the lock only long enough to
//! pop one item, so contention stays negligible next to render and SMTP
//! time. `remaining` drives the progress figure reported after each record.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// FIFO handed out to the worker pool. Each item is popped exactly once.
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> WorkQueue<T> {
    pub fn new<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        Self {
            items: Mutex::new(items.into_iter().collect()),
        }
    }

    /// Take the next item, or `None` once the queue is drained.
    pub fn pop(&self) -> Option<T> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Items still waiting. In-flight items are not counted.
    pub fn remaining(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_pops_in_insertion_order() {
        let queue = WorkQueue::new([1, 2, 3]);

        assert_eq!(queue.remaining(), 3);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.remaining(), 1);
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.remaining(), 0);
    }

    #[test]
    fn test_empty_queue_pops_none() {
        let queue: WorkQueue<u32> = WorkQueue::new([]);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_concurrent_pops_hand_out_each_item_exactly_once() {
        let queue = Arc::new(WorkQueue::new(0..1000));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Some(item) = queue.pop() {
                        taken.push(item);
                    }
                    taken
                })
            })
            .collect();

        let mut all: Vec<i32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();

        assert_eq!(all, (0..1000).collect::<Vec<_>>());
        assert_eq!(queue.remaining(), 0);
    }
}
