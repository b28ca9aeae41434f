//! Thread-safe FIFO queues for steering and follow-up prompts

use crate::types::AgentMessage;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A FIFO queue of pending user messages.
#[derive(Default)]
pub struct MessageQueue {
    messages: Mutex<VecDeque<AgentMessage>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: AgentMessage) {
        if let Ok(mut q) = self.messages.lock() {
            q.push_back(message);
        }
    }

    pub fn pop(&self) -> Option<AgentMessage> {
        self.messages.lock().ok()?.pop_front()
    }

    pub fn peek(&self) -> Option<AgentMessage> {
        self.messages.lock().ok()?.front().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().map(|q| q.is_empty()).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut q) = self.messages.lock() {
            q.clear();
        }
    }

    /// Copy of the queued messages without draining.
    pub fn get_all(&self) -> Vec<AgentMessage> {
        self.messages
            .lock()
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let q = MessageQueue::new();
        q.push(AgentMessage::user("a"));
        q.push(AgentMessage::user("b"));

        assert_eq!(q.len(), 2);
        let text = |m: &AgentMessage| crate::types::extract_text(m.message.content());
        assert_eq!(text(&q.pop().unwrap()), "a");
        assert_eq!(text(&q.pop().unwrap()), "b");
        assert!(q.pop().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn peek_does_not_drain() {
        let q = MessageQueue::new();
        q.push(AgentMessage::user("a"));
        assert!(q.peek().is_some());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn get_all_copies_without_draining() {
        let q = MessageQueue::new();
        q.push(AgentMessage::user("a"));
        q.push(AgentMessage::user("b"));
        let all = q.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn clear_empties_queue() {
        let q = MessageQueue::new();
        q.push(AgentMessage::user("a"));
        q.clear();
        assert!(q.is_empty());
    }
}
