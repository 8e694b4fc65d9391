//! Bounded, closeable multi-producer/multi-consumer work queue.
//!
//! Every hand-off between pipeline stages goes through a [`WorkQueue`].
//! Producers block on [`WorkQueue::push`] while the queue is full; consumers
//! block on [`WorkQueue::pop`] while it is empty and still open. Closing the
//! queue is the "no more items" signal: consumers drain what is left and then
//! observe `None`, so no sentinel item is ever needed to wake them.

use async_channel::{Receiver, Sender};

/// Error returned when pushing into a closed queue. Carries the rejected item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueClosed<T>(pub T);

impl<T> std::fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("work queue is closed")
    }
}

impl<T: std::fmt::Debug> std::error::Error for QueueClosed<T> {}

/// Cloneable handle to a bounded MPMC queue.
///
/// All clones share the same buffer. Closing through any handle closes the
/// queue for everyone.
#[derive(Debug)]
pub struct WorkQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> WorkQueue<T> {
    /// Creates a queue holding at most `capacity` items (minimum 1).
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = async_channel::bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// Pushes an item, waiting while the queue is full.
    pub async fn push(&self, item: T) -> Result<(), QueueClosed<T>> {
        self.sender
            .send(item)
            .await
            .map_err(|async_channel::SendError(item)| QueueClosed(item))
    }

    /// Pops the next item, waiting while the queue is empty and open.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn pop(&self) -> Option<T> {
        self.receiver.recv().await.ok()
    }

    /// Pops an item if one is immediately available.
    pub fn try_pop(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Marks the queue complete. Buffered items remain poppable.
    ///
    /// Returns `true` if this call closed the queue.
    pub fn close(&self) -> bool {
        self.sender.close()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// `true` once the queue is closed and nothing is left to pop.
    pub fn is_drained(&self) -> bool {
        self.receiver.is_closed() && self.receiver.is_empty()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.sender.capacity()
    }
}
