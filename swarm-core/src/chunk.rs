//! Chunk plan: split a file into fixed-size chunks, collect results, reassemble.

use std::collections::BTreeMap;

/// Default chunk size in bytes, fixed for the lifetime of a peer.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024;

/// Largest advertised length a download accepts. Files are reassembled in memory.
pub const MAX_FILE_LEN: u64 = 4 << 30;

/// Byte range `[start, end)` of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkSpan {
    pub index: u64,
    pub start: u64,
    pub end: u64,
}

impl ChunkSpan {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// How a file of `length` bytes splits into chunks of `chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    length: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    /// A zero chunk size falls back to `DEFAULT_CHUNK_SIZE`.
    pub fn new(length: u64, chunk_size: u64) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self { length, chunk_size }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// `ceil(length / chunk_size)`.
    pub fn num_chunks(&self) -> u64 {
        self.length.div_ceil(self.chunk_size)
    }

    /// Span of chunk `index`, or `None` when out of range.
    pub fn span(&self, index: u64) -> Option<ChunkSpan> {
        if index >= self.num_chunks() {
            return None;
        }
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.length);
        Some(ChunkSpan { index, start, end })
    }

    pub fn spans(&self) -> impl Iterator<Item = ChunkSpan> + '_ {
        (0..self.num_chunks()).filter_map(|i| self.span(i))
    }
}

/// Retrieved chunk payloads for one download, keyed by index.
/// Once an index is stored its bytes never change.
#[derive(Debug)]
pub struct ResultTable {
    plan: ChunkPlan,
    received: BTreeMap<u64, Vec<u8>>,
}

impl ResultTable {
    pub fn new(plan: ChunkPlan) -> Self {
        Self {
            plan,
            received: BTreeMap::new(),
        }
    }

    /// Store a chunk. Returns false (and keeps the first copy) if the index was already present,
    /// the index is out of range, or the payload length does not match the planned span.
    pub fn insert(&mut self, index: u64, payload: Vec<u8>) -> bool {
        let Some(span) = self.plan.span(index) else {
            return false;
        };
        if payload.len() as u64 != span.len() || self.received.contains_key(&index) {
            return false;
        }
        self.received.insert(index, payload);
        true
    }

    pub fn len(&self) -> u64 {
        self.received.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.len() == self.plan.num_chunks()
    }

    /// Concatenate chunks in index order. `None` until every chunk is present.
    pub fn reassemble(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let mut out = Vec::with_capacity(self.plan.length() as usize);
        for payload in self.received.values() {
            out.extend_from_slice(payload);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    fn payload_for(span: ChunkSpan) -> Vec<u8> {
        (span.start..span.end).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn plan_2500_by_1024() {
        let plan = ChunkPlan::new(2500, 1024);
        assert_eq!(plan.num_chunks(), 3);
        let spans: Vec<(u64, u64)> = plan.spans().map(|s| (s.start, s.end)).collect();
        assert_eq!(spans, vec![(0, 1024), (1024, 2048), (2048, 2500)]);
        assert!(plan.span(3).is_none());
    }

    #[test]
    fn plan_exact_multiple() {
        let plan = ChunkPlan::new(90, 30);
        assert_eq!(plan.num_chunks(), 3);
        assert_eq!(plan.span(2).unwrap().end, 90);
    }

    #[test]
    fn plan_single_chunk() {
        let plan = ChunkPlan::new(10, 100);
        assert_eq!(plan.num_chunks(), 1);
        let s = plan.span(0).unwrap();
        assert_eq!((s.start, s.end), (0, 10));
    }

    #[test]
    fn plan_zero_length() {
        let plan = ChunkPlan::new(0, 30);
        assert_eq!(plan.num_chunks(), 0);
        assert!(plan.span(0).is_none());
        assert_eq!(ResultTable::new(plan).reassemble(), Some(Vec::new()));
    }

    #[test]
    fn plan_zero_chunk_size_uses_default() {
        let plan = ChunkPlan::new(DEFAULT_CHUNK_SIZE * 2, 0);
        assert_eq!(plan.num_chunks(), 2);
    }

    #[test]
    fn reassemble_in_index_order_regardless_of_arrival() {
        let plan = ChunkPlan::new(2500, 1024);
        let mut spans: Vec<ChunkSpan> = plan.spans().collect();
        spans.shuffle(&mut rand::thread_rng());
        let mut table = ResultTable::new(plan);
        for s in spans {
            assert!(!table.is_complete());
            assert!(table.insert(s.index, payload_for(s)));
        }
        assert!(table.is_complete());
        let bytes = table.reassemble().unwrap();
        let expected: Vec<u8> = (0..2500u64).map(|i| (i % 251) as u8).collect();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn duplicate_chunk_is_idempotent() {
        let plan = ChunkPlan::new(50, 25);
        let mut table = ResultTable::new(plan);
        assert!(table.insert(0, vec![1; 25]));
        assert!(!table.insert(0, vec![2; 25]));
        assert!(table.insert(1, vec![3; 25]));
        assert_eq!(table.len(), 2);
        let bytes = table.reassemble().unwrap();
        assert_eq!(&bytes[..25], &[1; 25]);
    }

    #[test]
    fn wrong_length_or_index_rejected() {
        let plan = ChunkPlan::new(50, 25);
        let mut table = ResultTable::new(plan);
        assert!(!table.insert(0, vec![0; 24]));
        assert!(!table.insert(2, vec![0; 25]));
        assert!(table.is_empty());
    }

    #[test]
    fn incomplete_table_does_not_reassemble() {
        let plan = ChunkPlan::new(50, 25);
        let mut table = ResultTable::new(plan);
        table.insert(1, vec![0; 25]);
        assert!(table.reassemble().is_none());
    }
}
