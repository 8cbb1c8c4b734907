//! Outbound Queue
//!
//! Bounded hand-off between `publish` callers and the publisher task.
//! A full queue discards its oldest message.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use crossbeam_queue::ArrayQueue;
use tokio::sync::Notify;

/// Message waiting for the publisher task
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Outbound {
    pub topic: String,
    pub payload: Bytes,
}

pub(crate) struct OutboundQueue {
    messages: ArrayQueue<Outbound>,
    ready: Notify,
    dropped: AtomicU64,
}

impl OutboundQueue {
    /// `capacity` must be non-zero
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            messages: ArrayQueue::new(capacity),
            ready: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue and wake the publisher. Returns the message displaced to make
    /// room, if any.
    pub(crate) fn push(&self, message: Outbound) -> Option<Outbound> {
        let displaced = self.messages.force_push(message);
        if displaced.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.ready.notify_one();
        displaced
    }

    pub(crate) fn pop(&self) -> Option<Outbound> {
        self.messages.pop()
    }

    /// Resolves after the next `push`, or at once if one happened unobserved
    pub(crate) async fn ready(&self) {
        self.ready.notified().await
    }

    /// Messages displaced so far
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    fn message(topic: &str, payload: &'static str) -> Outbound {
        Outbound {
            topic: topic.to_string(),
            payload: Bytes::from_static(payload.as_bytes()),
        }
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        // Nothing drains the queue, as when the publisher is stalled
        let queue = OutboundQueue::new(2);

        assert_eq!(queue.push(message("meteo/a", "1")), None);
        assert_eq!(queue.push(message("meteo/b", "2")), None);
        assert_eq!(queue.dropped(), 0);

        let displaced = queue.push(message("meteo/c", "3"));
        assert_eq!(displaced, Some(message("meteo/a", "1")));
        assert_eq!(queue.dropped(), 1);

        assert_eq!(queue.pop(), Some(message("meteo/b", "2")));
        assert_eq!(queue.pop(), Some(message("meteo/c", "3")));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_drop_count_accumulates() {
        let queue = OutboundQueue::new(1);
        for i in 0..5 {
            queue.push(message("meteo/a", if i % 2 == 0 { "even" } else { "odd" }));
        }
        assert_eq!(queue.dropped(), 4);
        assert_eq!(queue.pop(), Some(message("meteo/a", "even")));
    }

    #[tokio::test]
    async fn test_push_before_wait_is_not_lost() {
        let queue = OutboundQueue::new(4);
        queue.push(message("meteo/a", "1"));

        tokio::time::timeout(Duration::from_secs(1), queue.ready())
            .await
            .expect("push should leave a wakeup behind");
    }
}
