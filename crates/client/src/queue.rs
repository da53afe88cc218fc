// Bounded FIFO of messages composed while disconnected.

use std::collections::VecDeque;

use intelhub_common::protocol::ws::ClientMessage;

#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<ClientMessage>,
    capacity: usize,
    dropped: u64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { items: VecDeque::with_capacity(capacity.min(64)), capacity, dropped: 0 }
    }

    /// Append a message. When full, the oldest entry is evicted and returned.
    pub fn push(&mut self, message: ClientMessage) -> Option<ClientMessage> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(message);
        evicted
    }

    /// Prepend a message that was taken for sending but never delivered.
    pub fn push_front(&mut self, message: ClientMessage) {
        if self.items.len() >= self.capacity {
            self.dropped += 1;
            self.items.pop_back();
        }
        self.items.push_front(message);
    }

    pub fn pop_front(&mut self) -> Option<ClientMessage> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Messages lost to overflow since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(n: u64) -> ClientMessage {
        ClientMessage::new("alert_created", Some(json!({ "alertId": n })))
    }

    #[test]
    fn preserves_fifo_order() {
        let mut queue = OutboundQueue::new(8);
        for n in 0..3 {
            assert!(queue.push(message(n)).is_none());
        }

        let drained: Vec<_> = std::iter::from_fn(|| queue.pop_front()).collect();
        assert_eq!(drained, vec![message(0), message(1), message(2)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut queue = OutboundQueue::new(2);
        queue.push(message(1));
        queue.push(message(2));

        assert_eq!(queue.push(message(3)), Some(message(1)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop_front(), Some(message(2)));
        assert_eq!(queue.pop_front(), Some(message(3)));
    }

    #[test]
    fn push_front_restores_head_of_line() {
        let mut queue = OutboundQueue::new(4);
        queue.push(message(2));
        queue.push_front(message(1));
        assert_eq!(queue.pop_front(), Some(message(1)));
        assert_eq!(queue.pop_front(), Some(message(2)));
    }
}
