// FIFO of replies and notifications waiting for the sender worker.

use super::protocol::OutboundMessage;
use crate::sync::lock;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Default)]
struct QueueState {
    messages: VecDeque<OutboundMessage>,
    closed: bool,
}

/// Thread-safe FIFO of outbound messages. Once closed it stays empty.
#[derive(Default)]
pub struct OutboundQueue {
    state: Mutex<QueueState>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Returns `false` if the queue has been closed.
    pub fn enqueue(&self, message: OutboundMessage) -> bool {
        let mut state = lock(&self.state);
        if state.closed {
            return false;
        }
        state.messages.push_back(message);
        true
    }

    pub fn pop_front(&self) -> Option<OutboundMessage> {
        lock(&self.state).messages.pop_front()
    }

    /// Refuse further messages and discard the queued ones, atomically with
    /// respect to `enqueue`. Returns how many were dropped.
    pub fn close(&self) -> usize {
        let mut state = lock(&self.state);
        state.closed = true;
        let dropped = state.messages.len();
        state.messages.clear();
        dropped
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn len(&self) -> usize {
        lock(&self.state).messages.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = OutboundQueue::new();
        queue.enqueue(OutboundMessage::acknowledgement(0, "first"));
        queue.enqueue(OutboundMessage::reply("second"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_front().unwrap().text, "first");
        assert_eq!(queue.pop_front().unwrap().text, "second");
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn test_close_races_with_producer() {
        let queue = Arc::new(OutboundQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut accepted = 0;
                while queue.enqueue(OutboundMessage::reply("spam")) {
                    accepted += 1;
                    thread::yield_now();
                }
                accepted
            })
        };

        while queue.is_empty() {
            thread::yield_now();
        }
        queue.close();
        // Nothing can land after `close` returns.
        assert!(queue.is_empty());
        assert!(producer.join().unwrap() > 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_closed_queue_refuses_messages() {
        let queue = OutboundQueue::new();
        assert!(queue.enqueue(OutboundMessage::reply("first")));
        assert!(queue.enqueue(OutboundMessage::reply("second")));
        assert_eq!(queue.close(), 2);
        assert!(queue.is_closed());

        assert!(!queue.enqueue(OutboundMessage::reply("late")));
        assert!(queue.is_empty());
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let queue = Arc::new(OutboundQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for seq in 0..50 {
                        queue.enqueue(OutboundMessage::acknowledgement(producer, seq.to_string()));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut last_seen = [-1i32; 4];
        while let Some(message) = queue.pop_front() {
            let seq: i32 = message.text.parse().unwrap();
            let producer = message.code as usize;
            assert!(seq > last_seen[producer]);
            last_seen[producer] = seq;
        }
        assert_eq!(last_seen, [49; 4]);
    }
}
