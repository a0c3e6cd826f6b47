use super::error::SchedulerError;
use super::job::{JobId, Priority};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A pending job as seen by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: JobId,
    pub priority: Priority,
    pub submitted_at: u64,
    pub sequence: u64,
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Greater means "pulled sooner": higher priority, then earlier submission.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.submitted_at.cmp(&self.submitted_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Max-heap of pending job ids.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: QueueEntry) {
        self.heap.push(entry);
    }

    pub fn peek(&self) -> Option<&QueueEntry> {
        self.heap.peek()
    }

    pub fn pop(&mut self) -> Result<QueueEntry, SchedulerError> {
        self.heap.pop().ok_or(SchedulerError::Empty)
    }

    /// Zero-based rank of `id` in pull order, or `None` once it has left the
    /// queue (or never entered it).
    pub fn position_of(&self, id: JobId) -> Option<usize> {
        self.snapshot_ordered().iter().position(|e| e.id == id)
    }

    /// Every pending entry, next-to-be-pulled first.
    pub fn snapshot_ordered(&self) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = self.heap.iter().copied().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
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

    fn entry(id: u64, priority: Priority, sequence: u64) -> QueueEntry {
        QueueEntry {
            id: JobId::new(id),
            priority,
            submitted_at: sequence,
            sequence,
        }
    }

    fn drain(queue: &mut PriorityQueue) -> Vec<u64> {
        let mut order = Vec::new();
        while let Ok(e) = queue.pop() {
            order.push(e.id.as_u64());
        }
        order
    }

    #[test]
    fn test_pop_empty() {
        let mut queue = PriorityQueue::new();
        assert_eq!(queue.pop(), Err(SchedulerError::Empty));
        assert!(queue.peek().is_none());
    }

    #[test]
    fn test_high_jumps_ahead() {
        let mut queue = PriorityQueue::new();
        queue.push(entry(1, Priority::Normal, 0));
        queue.push(entry(2, Priority::High, 1));
        queue.push(entry(3, Priority::Normal, 2));
        assert_eq!(drain(&mut queue), vec![2, 1, 3]);
    }

    #[test]
    fn test_fifo_within_class() {
        let mut queue = PriorityQueue::new();
        for i in 1..=20 {
            queue.push(entry(i, Priority::Low, i));
        }
        assert_eq!(drain(&mut queue), (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_millisecond_uses_sequence() {
        let mut queue = PriorityQueue::new();
        let mut a = entry(1, Priority::Normal, 0);
        let mut b = entry(2, Priority::Normal, 1);
        a.submitted_at = 5;
        b.submitted_at = 5;
        queue.push(b);
        queue.push(a);
        assert_eq!(drain(&mut queue), vec![1, 2]);
    }

    #[test]
    fn test_position_of() {
        let mut queue = PriorityQueue::new();
        queue.push(entry(1, Priority::Low, 0));
        queue.push(entry(2, Priority::Normal, 1));
        queue.push(entry(3, Priority::High, 2));

        assert_eq!(queue.position_of(JobId::new(3)), Some(0));
        assert_eq!(queue.position_of(JobId::new(2)), Some(1));
        assert_eq!(queue.position_of(JobId::new(1)), Some(2));
        assert_eq!(queue.position_of(JobId::new(4)), None);

        queue.pop().unwrap();
        assert_eq!(queue.position_of(JobId::new(3)), None);
        assert_eq!(queue.position_of(JobId::new(2)), Some(0));
    }

    #[test]
    fn test_snapshot_ordered_matches_pull_order() {
        let mut queue = PriorityQueue::new();
        queue.push(entry(1, Priority::Normal, 0));
        queue.push(entry(2, Priority::Low, 1));
        queue.push(entry(3, Priority::High, 2));
        queue.push(entry(4, Priority::Normal, 3));

        let ids: Vec<u64> = queue
            .snapshot_ordered()
            .iter()
            .map(|e| e.id.as_u64())
            .collect();
        assert_eq!(ids, vec![3, 1, 4, 2]);
        assert_eq!(drain(&mut queue), ids);
    }
}
