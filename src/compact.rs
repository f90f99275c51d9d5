use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::thread;

use parking_lot::Mutex;

use crate::types::VertexId;

const SHARDS: usize = 16;

/// Sharded set of source vertices touched by writes, consumed by an
/// external background compactor that prunes unreachable old blocks.
///
/// Shards are keyed by thread id so concurrent writers rarely contend.
pub struct CompactTable {
    shards: Box<[Mutex<HashSet<VertexId>>]>,
}

impl CompactTable {
    pub fn new() -> Self {
        let shards = (0..SHARDS)
            .map(|_| Mutex::new(HashSet::new()))
            .collect();
        Self { shards }
    }

    fn shard(&self) -> &Mutex<HashSet<VertexId>> {
        let mut hasher = DefaultHasher::new();
        thread::current().id().hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARDS]
    }

    pub fn record(&self, vertex: VertexId) {
        self.shard().lock().insert(vertex);
    }

    /// Drains every shard into one candidate set for the compactor.
    pub fn drain(&self) -> HashSet<VertexId> {
        let mut all = HashSet::new();
        for shard in self.shards.iter() {
            all.extend(shard.lock().drain());
        }
        all
    }
}

impl Default for CompactTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn records_across_threads_and_drains_once() {
        let table = Arc::new(CompactTable::new());
        let handles: Vec<_> = (0..4u64)
            .map(|i| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    table.record(i);
                    table.record(i + 100);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let drained = table.drain();
        assert_eq!(drained.len(), 8);
        assert!(drained.contains(&102));
        assert!(table.drain().is_empty());
    }
}
