//! Bounded FIFO of control messages issued while the socket is down.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use tracing::{trace, warn};

use crate::protocol::ClientMessage;

// ============================================================================
// Constants
// ============================================================================

/// Default number of messages held while disconnected.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

// ============================================================================
// OutboundBuffer
// ============================================================================

/// Holds control messages until the next successful open.
///
/// When full, the incoming message is rejected and earlier messages are
/// kept. Audio frames never enter this buffer.
#[derive(Debug)]
pub struct OutboundBuffer {
    queue: VecDeque<ClientMessage>,
    capacity: usize,
}

impl Default for OutboundBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl OutboundBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `message`, or drops it with a warning when full.
    ///
    /// Returns `true` if the message was kept.
    pub fn enqueue(&mut self, message: ClientMessage) -> bool {
        if self.queue.len() >= self.capacity {
            warn!(
                message_type = message.message_type.as_str(),
                capacity = self.capacity,
                "Outbound buffer full, dropping message"
            );
            return false;
        }

        trace!(
            message_type = message.message_type.as_str(),
            buffered = self.queue.len() + 1,
            "Message buffered"
        );
        self.queue.push_back(message);
        true
    }

    /// Removes and returns everything, oldest first.
    pub fn drain(&mut self) -> VecDeque<ClientMessage> {
        std::mem::take(&mut self.queue)
    }

    /// Discards everything.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Number of buffered messages.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// `true` if nothing is buffered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Maximum number of messages held.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::protocol::ClientMessageType;
    use crate::testing::capture_logs;

    fn note(n: usize) -> ClientMessage {
        ClientMessage::new(ClientMessageType::AgentNote, json!({ "note": n }))
    }

    #[test]
    fn test_fifo_order() {
        let mut buffer = OutboundBuffer::default();
        for n in 0..3 {
            assert!(buffer.enqueue(note(n)));
        }

        let drained: Vec<_> = buffer.drain().into_iter().map(|m| m.payload["note"].clone()).collect();
        assert_eq!(drained, vec![json!(0), json!(1), json!(2)]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_rejects_newest() {
        let mut buffer = OutboundBuffer::default();
        let kept = (0..105).filter(|&n| buffer.enqueue(note(n))).count();

        assert_eq!(kept, 100);
        assert_eq!(buffer.len(), 100);

        let drained = buffer.drain();
        assert_eq!(drained.front().unwrap().payload["note"], json!(0));
        assert_eq!(drained.back().unwrap().payload["note"], json!(99));
    }

    #[test]
    fn test_overflow_logs_warning_per_dropped_message() {
        let mut buffer = OutboundBuffer::default();
        let (kept, logs) = capture_logs(|| (0..105).filter(|&n| buffer.enqueue(note(n))).count());

        assert_eq!(kept, 100);
        let warnings: Vec<&str> = logs.lines().filter(|l| l.contains("Outbound buffer full")).collect();
        assert_eq!(warnings.len(), 5, "{logs}");
        assert!(warnings.iter().all(|l| l.contains("WARN") && l.contains("capacity=100")));
    }

    #[test]
    fn test_clear() {
        let mut buffer = OutboundBuffer::new(2);
        buffer.enqueue(note(1));
        buffer.clear();
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.capacity(), 2);
    }
}
