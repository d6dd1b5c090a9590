//! Bounded stage queues with a producer-completion barrier
//!
//! A [`StageQueue`] connects one stage to the next. Every producer of the
//! queue is registered up front and holds a [`Producer`] handle; the queue
//! is closed when the last registered producer finishes, never before.
//! Consumers see the close as `recv()` returning `None` once the buffered
//! items are drained.
//!
//! ```text
//!   Producer ─┐
//!   Producer ─┼─► [ bounded channel ] ─► StageReceiver (cloned per worker)
//!   Producer ─┘         ▲
//!                       └── closed when pending producers reaches 0
//! ```

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared<T> {
    /// Dropped when the last producer finishes; that disconnects the channel
    sender: Mutex<Option<Sender<T>>>,

    /// Registered producers that have not finished yet
    pending: AtomicUsize,

    /// Set once the barrier has released
    closed: AtomicBool,
}

impl<T> Shared<T> {
    fn producer_done(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.closed.store(true, Ordering::Release);
            self.sender.lock().take();
        }
    }
}

/// Queue between two pipeline stages
pub struct StageQueue<T> {
    shared: Arc<Shared<T>>,
    receiver: Receiver<T>,
}

impl<T> StageQueue<T> {
    /// Create a new queue. A capacity of 0 makes every send a rendezvous.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);

        Self {
            shared: Arc::new(Shared {
                sender: Mutex::new(Some(sender)),
                pending: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
            receiver,
        }
    }

    /// Register a producer. All producers must be registered before any of
    /// them finishes, otherwise the queue may close early.
    ///
    /// Returns `None` if the queue has already closed.
    pub fn producer(&self) -> Option<Producer<T>> {
        let sender = self.shared.sender.lock().as_ref()?.clone();
        self.shared.pending.fetch_add(1, Ordering::AcqRel);

        Some(Producer {
            sender: Some(sender),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Register `count` producers at once
    pub fn producers(&self, count: usize) -> Vec<Producer<T>> {
        (0..count).filter_map(|_| self.producer()).collect()
    }

    /// Get a receiver for this queue (clone for each worker)
    pub fn receiver(&self) -> StageReceiver<T> {
        StageReceiver {
            receiver: self.receiver.clone(),
        }
    }

    /// Whether every registered producer has finished
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Producers still running
    pub fn pending_producers(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }
}

/// Handle held by one producer of a stage queue
///
/// Dropping the handle counts as finishing, so a producer that panics still
/// releases the barrier.
pub struct Producer<T> {
    sender: Option<Sender<T>>,
    shared: Arc<Shared<T>>,
}

impl<T> Producer<T> {
    /// Send an item, blocking while the queue is full.
    ///
    /// Returns the item back if every consumer is gone.
    pub fn send(&self, item: T) -> Result<(), T> {
        let Some(sender) = self.sender.as_ref() else {
            return Err(item);
        };
        sender.send(item).map_err(|e| e.into_inner())
    }

    /// Signal that this producer will send nothing more
    pub fn finish(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.sender.take().is_some() {
            self.shared.producer_done();
        }
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Handle for receiving from a stage queue
pub struct StageReceiver<T> {
    receiver: Receiver<T>,
}

impl<T> Clone for StageReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> StageReceiver<T> {
    /// Receive the next item, blocking until one arrives or the queue is
    /// closed and drained.
    pub fn recv(&self) -> Option<T> {
        self.receiver.recv().ok()
    }
}

impl<T> Iterator for StageReceiver<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_queue_basic() {
        let queue = StageQueue::new(10);
        let producer = queue.producer().unwrap();
        let receiver = queue.receiver();

        producer.send("/usr/lib/libz.dylib").unwrap();
        assert_eq!(receiver.recv(), Some("/usr/lib/libz.dylib"));

        producer.finish();
        assert!(queue.is_closed());
        assert_eq!(receiver.recv(), None);
    }

    #[test]
    fn test_closes_only_after_last_producer() {
        let queue: StageQueue<u32> = StageQueue::new(10);
        let mut producers = queue.producers(3);
        assert_eq!(queue.pending_producers(), 3);

        producers.pop().unwrap().finish();
        producers.pop().unwrap().finish();
        assert!(!queue.is_closed());
        assert_eq!(queue.pending_producers(), 1);

        producers.pop().unwrap().finish();
        assert!(queue.is_closed());
        assert_eq!(queue.receiver().recv(), None);
    }

    #[test]
    fn test_drop_releases_barrier() {
        let queue: StageQueue<u32> = StageQueue::new(1);
        let producer = queue.producer().unwrap();

        let handle = thread::spawn(move || {
            producer.send(7).unwrap();
            panic!("producer failed");
        });
        assert!(handle.join().is_err());

        assert!(queue.is_closed());
        let receiver = queue.receiver();
        assert_eq!(receiver.recv(), Some(7));
        assert_eq!(receiver.recv(), None);
    }

    #[test]
    fn test_no_producer_after_close() {
        let queue: StageQueue<u32> = StageQueue::new(1);
        queue.producer().unwrap().finish();
        assert!(queue.producer().is_none());
    }

    #[test]
    fn test_buffered_items_survive_close() {
        let queue = StageQueue::new(4);
        let producer = queue.producer().unwrap();
        for i in 0..4 {
            producer.send(i).unwrap();
        }
        producer.finish();

        let received: Vec<_> = queue.receiver().collect();
        assert_eq!(received, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_rendezvous_queue() {
        let queue = StageQueue::new(0);
        let producer = queue.producer().unwrap();
        let receiver = queue.receiver();

        let handle = thread::spawn(move || {
            for i in 0..3 {
                producer.send(i).unwrap();
            }
        });

        let received: Vec<_> = receiver.collect();
        handle.join().unwrap();
        assert_eq!(received, vec![0, 1, 2]);
    }
}
