//! Priority queue for speech requests (spec.md §3 "Voice request",
//! ordered `(priority, enqueued_at)`). Lower `Priority` numbers are more
//! urgent and are popped first; ties break on earlier `enqueued_at`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Talk = 1,
    Emergency = 2,
    Notification = 3,
    Monologue = 4,
}

#[derive(Debug, Clone)]
pub struct VoiceRequest {
    pub text: String,
    pub priority: Priority,
    pub volume: u8,
    pub category: String,
    pub enqueued_at: DateTime<Utc>,
}

/// `BinaryHeap` is a max-heap, so `Ord` here is reversed relative to
/// `Priority`'s declaration order: a lower `Priority` value (more urgent)
/// must compare as greater so it surfaces first.
impl PartialEq for VoiceRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.enqueued_at == other.enqueued_at
    }
}
impl Eq for VoiceRequest {}

impl PartialOrd for VoiceRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VoiceRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
    }
}

#[derive(Default)]
pub struct SpeakQueue {
    heap: BinaryHeap<VoiceRequest>,
}

impl SpeakQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: VoiceRequest) {
        self.heap.push(request);
    }

    pub fn pop(&mut self) -> Option<VoiceRequest> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(priority: Priority, secs: i64) -> VoiceRequest {
        VoiceRequest {
            text: format!("{priority:?}"),
            priority,
            volume: 50,
            category: "test".to_string(),
            enqueued_at: Utc::now() + chrono::Duration::seconds(secs),
        }
    }

    #[test]
    fn pops_in_priority_order_regardless_of_push_order() {
        let mut queue = SpeakQueue::new();
        queue.push(request(Priority::Monologue, 0));
        queue.push(request(Priority::Emergency, 0));
        queue.push(request(Priority::Notification, 0));
        queue.push(request(Priority::Talk, 0));

        assert_eq!(queue.pop().unwrap().priority, Priority::Talk);
        assert_eq!(queue.pop().unwrap().priority, Priority::Emergency);
        assert_eq!(queue.pop().unwrap().priority, Priority::Notification);
        assert_eq!(queue.pop().unwrap().priority, Priority::Monologue);
    }

    #[test]
    fn ties_on_priority_break_on_earlier_enqueue_time() {
        let earlier = request(Priority::Notification, 1);
        let earlier_at = earlier.enqueued_at;
        let mut queue = SpeakQueue::new();
        queue.push(request(Priority::Notification, 5));
        queue.push(earlier);

        assert_eq!(queue.pop().unwrap().enqueued_at, earlier_at);
    }
}
