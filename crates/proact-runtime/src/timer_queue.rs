//! Deadline-ordered timer queue.
//!
//! A min-heap of (deadline, operation record) pairs. The queue is not
//! internally locked: it lives under the `IoContext` dispatch mutex and
//! is only touched during the drain-and-merge step.
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Drain expired: O(k log n) for k expired timers
//! - Next deadline: O(1)

use proact_core::record::OpRecord;

use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;

/// Heap entry, ordered earliest-deadline-first with an insertion
/// sequence tie-break for deterministic draining.
struct TimerEntry {
    deadline: Instant,
    seq: u64,
    record: Arc<OpRecord>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        match other.deadline.cmp(&self.deadline) {
            std::cmp::Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Pending timer operations, earliest deadline first.
pub struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Arm a timer: the record completes (status 0) once `deadline`
    /// has elapsed and the dispatch loop merges it.
    pub fn insert(&mut self, deadline: Instant, record: Arc<OpRecord>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            deadline,
            seq,
            record,
        });
    }

    /// Remove and return every timer whose deadline has elapsed,
    /// earliest first, stamping the success result into each record.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<Arc<OpRecord>> {
        let mut ready = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break; // Heap is sorted, no more expired
            }
            let entry = self.heap.pop().unwrap();
            entry.record.set_result(0);
            ready.push(entry.record);
        }
        ready
    }

    /// Deadline of the earliest pending timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_drain_in_deadline_order() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for (id, offset_ms) in [(3u32, 30u64), (1, 10), (2, 20)] {
            let order = Arc::clone(&order);
            queue.insert(
                now + Duration::from_millis(offset_ms),
                OpRecord::new(move |_, _| order.lock().unwrap().push(id)),
            );
        }

        let ready = queue.drain_ready(now + Duration::from_millis(50));
        assert_eq!(ready.len(), 3);
        for record in ready {
            assert!(record.claim());
            let result = record.result();
            record.invoke(result);
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_drain_only_elapsed() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        queue.insert(now + Duration::from_millis(10), OpRecord::new(|_, _| {}));
        queue.insert(now + Duration::from_secs(10), OpRecord::new(|_, _| {}));

        let ready = queue.drain_ready(now + Duration::from_millis(20));
        assert_eq!(ready.len(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_stamps_success_result() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        let record = OpRecord::new(|_, _| {});
        record.set_result(-99);
        queue.insert(now, Arc::clone(&record));

        queue.drain_ready(now);
        assert_eq!(record.result(), 0);
    }

    #[test]
    fn test_next_deadline() {
        let mut queue = TimerQueue::new();
        assert!(queue.next_deadline().is_none());

        let now = Instant::now();
        queue.insert(now + Duration::from_millis(100), OpRecord::new(|_, _| {}));
        queue.insert(now + Duration::from_millis(10), OpRecord::new(|_, _| {}));

        assert_eq!(queue.next_deadline(), Some(now + Duration::from_millis(10)));
    }

    #[test]
    fn test_same_deadline_drains_in_insert_order() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        let hits = Arc::new(AtomicUsize::new(0));

        for expect in 0..3usize {
            let hits = Arc::clone(&hits);
            queue.insert(
                now,
                OpRecord::new(move |_, _| {
                    assert_eq!(hits.fetch_add(1, Ordering::SeqCst), expect);
                }),
            );
        }

        for record in queue.drain_ready(now) {
            assert!(record.claim());
            record.invoke(0);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
