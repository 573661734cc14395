//! Ordered, deduplicated trace list for one stream session.

use std::collections::HashSet;

use shared_types::{TraceIdentity, TraceRecord};

/// Merged trace records, newest first.
///
/// Insertion lands where "prepend, then stable sort descending by
/// `created_at`" would put the record: before every record with an equal or
/// older timestamp. Stream and fallback results both go through `insert`, so
/// whichever source delivers a record first wins and the other is a no-op.
#[derive(Debug, Clone)]
pub struct TraceLog {
    records: Vec<TraceRecord>,
    seen: HashSet<TraceIdentity>,
    max_len: usize,
}

impl TraceLog {
    pub fn new(max_len: usize) -> Self {
        Self {
            records: Vec::new(),
            seen: HashSet::new(),
            max_len: max_len.max(1),
        }
    }

    /// Returns `false` when the record was already present, or when it is
    /// older than everything in a full window and would be evicted at once.
    pub fn insert(&mut self, record: TraceRecord) -> bool {
        let identity = record.identity();
        if self.seen.contains(&identity) {
            return false;
        }

        let position = self
            .records
            .partition_point(|existing| existing.created_at > record.created_at);
        if position >= self.max_len {
            return false;
        }
        self.records.insert(position, record);
        self.seen.insert(identity);
        self.evict_overflow();
        true
    }

    /// Merge a fetched batch; returns how many records were new.
    ///
    /// Batches arrive newest first, so they are inserted oldest first to keep
    /// the batch's own order among equal timestamps.
    pub fn merge_batch(&mut self, batch: Vec<TraceRecord>) -> usize {
        batch
            .into_iter()
            .rev()
            .fold(0, |added, record| added + usize::from(self.insert(record)))
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub fn to_vec(&self) -> Vec<TraceRecord> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // Oldest records live at the tail.
    fn evict_overflow(&mut self) {
        while self.records.len() > self.max_len {
            if let Some(evicted) = self.records.pop() {
                self.seen.remove(&evicted.identity());
            }
        }
    }
}
