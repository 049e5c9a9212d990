//! Outbound batching buffer.
//!
//! Generalizes the teacher's `pending_messages: Vec<MessageOut>` — there only a
//! disconnected-state queue flushed automatically on reconnect — into an explicit,
//! user-controlled batching mode: while active, outbound commands accumulate here
//! instead of going straight to the transport, and a single `Codec::encode_commands`
//! call turns the whole queue into one frame on flush.

use crate::codec::Command;

/// Buffers outbound commands while batching is active.
#[derive(Default)]
pub struct Batch {
    active: bool,
    queue: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self { active: false, queue: Vec::new() }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn start(&mut self) {
        self.active = true;
    }

    /// Stops batching. Returns the queued commands if `flush` is true (the caller is
    /// responsible for encoding and sending them); otherwise the queue is dropped
    /// silently.
    pub fn stop(&mut self, flush: bool) -> Vec<Command> {
        self.active = false;
        if flush {
            std::mem::take(&mut self.queue)
        } else {
            self.queue.clear();
            Vec::new()
        }
    }

    /// Appends a command to the queue. Only meaningful while `is_active()`; the
    /// caller decides whether to buffer or send directly.
    pub fn enqueue(&mut self, command: Command) {
        self.queue.push(command);
    }

    /// Drains and returns the queued commands, leaving batching mode untouched. A
    /// drain of an empty queue is a no-op for the caller (nothing to encode/send).
    pub fn take(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.queue)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Method;

    #[test]
    fn test_start_stop_toggles_active() {
        let mut batch = Batch::new();
        assert!(!batch.is_active());
        batch.start();
        assert!(batch.is_active());
        batch.stop(false);
        assert!(!batch.is_active());
    }

    #[test]
    fn test_enqueue_accumulates_while_active() {
        let mut batch = Batch::new();
        batch.start();
        batch.enqueue(Command::new(Some(1), Method::Ping, None));
        batch.enqueue(Command::new(Some(2), Method::Ping, None));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_stop_without_flush_drops_queue() {
        let mut batch = Batch::new();
        batch.start();
        batch.enqueue(Command::new(Some(1), Method::Ping, None));
        let drained = batch.stop(false);
        assert!(drained.is_empty());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_stop_with_flush_returns_queue() {
        let mut batch = Batch::new();
        batch.start();
        batch.enqueue(Command::new(Some(1), Method::Ping, None));
        let drained = batch.stop(true);
        assert_eq!(drained.len(), 1);
    }

    #[test]
    fn test_take_empty_queue_is_noop() {
        let mut batch = Batch::new();
        let drained = batch.take();
        assert!(drained.is_empty());
    }
}
