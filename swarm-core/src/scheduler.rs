//! Work queue: hand out chunk indices to fetch workers; take them back when a fetch fails.

use std::collections::{BTreeSet, VecDeque};

/// Outcome of asking the queue for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Fetch this chunk.
    Chunk(u64),
    /// Nothing pending, but other workers still hold claims that may come back.
    Wait,
    /// Every chunk has been completed.
    Done,
}

/// Chunk indices not yet retrieved. Each index is in exactly one of pending, in flight, or
/// completed. Pending indices are the unclaimed tail `next..total` plus any requeued ones, so
/// the queue never materializes the full index range.
#[derive(Debug)]
pub struct WorkQueue {
    next: u64,
    total: u64,
    retry: VecDeque<u64>,
    in_flight: BTreeSet<u64>,
    completed: u64,
}

impl WorkQueue {
    /// Queue holding `0..num_chunks`.
    pub fn new(num_chunks: u64) -> Self {
        Self {
            next: 0,
            total: num_chunks,
            retry: VecDeque::new(),
            in_flight: BTreeSet::new(),
            completed: 0,
        }
    }

    /// Take the next pending index. Requeued indices go before untouched ones.
    pub fn claim(&mut self) -> Claim {
        let index = match self.retry.pop_front() {
            Some(index) => index,
            None if self.next < self.total => {
                self.next += 1;
                self.next - 1
            }
            None if self.in_flight.is_empty() => return Claim::Done,
            None => return Claim::Wait,
        };
        self.in_flight.insert(index);
        Claim::Chunk(index)
    }

    /// Mark a claimed index as retrieved. Returns false if it was not in flight.
    pub fn complete(&mut self, index: u64) -> bool {
        if !self.in_flight.remove(&index) {
            return false;
        }
        self.completed += 1;
        true
    }

    /// Return a claimed index after a failed fetch. It goes to the front so the next claim
    /// retries it first. Returns false if it was not in flight.
    pub fn requeue(&mut self, index: u64) -> bool {
        if !self.in_flight.remove(&index) {
            return false;
        }
        self.retry.push_front(index);
        true
    }

    pub fn pending(&self) -> u64 {
        self.retry.len() as u64 + (self.total - self.next)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn is_done(&self) -> bool {
        self.completed == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_in_order_then_done() {
        let mut q = WorkQueue::new(3);
        assert_eq!(q.claim(), Claim::Chunk(0));
        assert_eq!(q.claim(), Claim::Chunk(1));
        assert_eq!(q.claim(), Claim::Chunk(2));
        assert_eq!(q.claim(), Claim::Wait);
        assert!(q.complete(0));
        assert!(q.complete(1));
        assert_eq!(q.claim(), Claim::Wait);
        assert!(q.complete(2));
        assert_eq!(q.claim(), Claim::Done);
        assert!(q.is_done());
    }

    #[test]
    fn empty_queue_is_done() {
        let mut q = WorkQueue::new(0);
        assert_eq!(q.claim(), Claim::Done);
        assert!(q.is_done());
    }

    #[test]
    fn requeued_index_is_claimed_next() {
        let mut q = WorkQueue::new(3);
        assert_eq!(q.claim(), Claim::Chunk(0));
        assert_eq!(q.claim(), Claim::Chunk(1));
        assert!(q.requeue(0));
        assert_eq!(q.pending(), 2);
        assert_eq!(q.claim(), Claim::Chunk(0));
    }

    #[test]
    fn complete_and_requeue_require_a_claim() {
        let mut q = WorkQueue::new(2);
        assert!(!q.complete(0));
        assert!(!q.requeue(1));
        assert_eq!(q.claim(), Claim::Chunk(0));
        assert!(q.complete(0));
        assert!(!q.complete(0));
        assert!(!q.requeue(0));
        assert_eq!(q.completed(), 1);
    }

    #[test]
    fn failed_claims_never_duplicate_or_drop() {
        let mut q = WorkQueue::new(4);
        let mut seen = Vec::new();
        loop {
            match q.claim() {
                Claim::Chunk(i) if i % 2 == 0 && !seen.contains(&(i + 100)) => {
                    // First attempt at even chunks fails.
                    seen.push(i + 100);
                    assert!(q.requeue(i));
                }
                Claim::Chunk(i) => {
                    seen.push(i);
                    assert!(q.complete(i));
                }
                Claim::Wait => panic!("single worker should never wait"),
                Claim::Done => break,
            }
        }
        let mut done: Vec<u64> = seen.into_iter().filter(|i| *i < 100).collect();
        done.sort();
        assert_eq!(done, vec![0, 1, 2, 3]);
        assert_eq!(q.in_flight(), 0);
    }

    #[test]
    fn huge_queue_is_lazy() {
        let mut q = WorkQueue::new(u64::MAX);
        assert_eq!(q.pending(), u64::MAX);
        assert_eq!(q.claim(), Claim::Chunk(0));
        assert_eq!(q.claim(), Claim::Chunk(1));
        assert!(q.requeue(0));
        assert_eq!(q.claim(), Claim::Chunk(0));
        assert_eq!(q.pending(), u64::MAX - 2);
        assert!(!q.is_done());
    }
}
