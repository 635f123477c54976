//! Bounded Window
//!
//! A fixed-capacity, arrival-ordered window over the most recent records,
//! and a shared handle around it for listeners and renderers.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::watch;

/// Default number of records kept for display
pub const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(20) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Keeps the newest `capacity` items, oldest first
#[derive(Debug, Clone)]
pub struct BoundedStream<T> {
    capacity: NonZeroUsize,
    items: VecDeque<T>,
}

impl<T> BoundedStream<T> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity.get()),
        }
    }

    /// Append an item as the newest entry, evicting the oldest when full
    pub fn append(&mut self, item: T) {
        if self.items.len() == self.capacity.get() {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The most recently appended item
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> BoundedStream<T> {
    /// Copy of the current window, oldest to newest
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T> Default for BoundedStream<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Shared window written by a listener and read by a renderer.
///
/// Every append bumps a version counter; consumers either poll `snapshot`
/// or wait on `changes`.
pub struct SharedWindow<T> {
    inner: Arc<Mutex<BoundedStream<T>>>,
    version: Arc<watch::Sender<u64>>,
}

impl<T> Clone for SharedWindow<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            version: Arc::clone(&self.version),
        }
    }
}

impl<T> SharedWindow<T> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(BoundedStream::new(capacity))),
            version: Arc::new(version),
        }
    }

    pub fn append(&self, item: T) {
        self.inner.lock().append(item);
        self.version.send_modify(|v| *v += 1);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    /// Number of appends so far
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Receiver that is notified after each append
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

impl<T: Clone> SharedWindow<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capacity(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_keeps_last_k_in_arrival_order() {
        let mut stream = BoundedStream::new(capacity(20));
        for tick in 1..=25 {
            stream.append(tick);
        }

        assert_eq!(stream.len(), 20);
        assert_eq!(stream.snapshot(), (6..=25).collect::<Vec<_>>());
        assert_eq!(stream.latest(), Some(&25));
    }

    #[test]
    fn test_length_is_min_of_appends_and_capacity() {
        for k in 1..=6 {
            for n in 0..=12usize {
                let mut stream = BoundedStream::new(capacity(k));
                for i in 0..n {
                    stream.append(i);
                }
                let expected: Vec<_> = (n.saturating_sub(k)..n).collect();
                assert_eq!(stream.len(), n.min(k));
                assert_eq!(stream.snapshot(), expected, "k={} n={}", k, n);
            }
        }
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let mut stream = BoundedStream::new(capacity(3));
        stream.append("a");
        stream.append("b");

        let first = stream.snapshot();
        let second = stream.snapshot();
        assert_eq!(first, second);
        assert_eq!(stream.len(), 2);
    }

    #[test]
    fn test_default_capacity() {
        let stream: BoundedStream<u8> = BoundedStream::default();
        assert_eq!(stream.capacity(), 20);
        assert!(stream.is_empty());
    }

    #[tokio::test]
    async fn test_shared_window_notifies_on_append() {
        let window = SharedWindow::new(capacity(2));
        let mut changes = window.changes();

        let writer = window.clone();
        writer.append(1);
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow_and_update(), 1);

        writer.append(2);
        writer.append(3);
        assert_eq!(window.snapshot(), vec![2, 3]);
        assert_eq!(window.version(), 3);
    }
}
