mod iter;

pub use iter::{EdgeIterator, EdgeRef, EdgeVersionIterator};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::block::{
    bloom_bytes, BlockPtr, EdgeBlockView, TsSlot, BLOOM_FILTER_THRESHOLD, EDGE_ENTRY_LEN,
    EDGE_HEADER_LEN, LABEL_ENTRY_LEN, LABEL_HEADER_LEN, VERTEX_HEADER_LEN,
};
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::types::{
    cmp_timestamp, size_to_order, Label, Timestamp, VertexId, ROLLBACK_TOMBSTONE, UNVERSIONED,
};
use crate::wal::TxnWal;

/// How a transaction interacts with the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    /// Buffered, conflict-checked, WAL-emitting.
    ReadWrite,
    /// Snapshot reads only; never takes latches.
    ReadOnly,
    /// Publishes directly under held latches, bypassing conflict checks
    /// and the WAL. For bulk ingestion without concurrent writers.
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// A transaction over the graph.
///
/// Readers observe the snapshot taken at construction. Writers stage every
/// update in per-transaction caches, detect write-write conflicts
/// optimistically, and publish atomically at commit by stamping the commit
/// epoch into every recorded timestamp slot.
pub struct Transaction<'g> {
    graph: &'g Graph,
    mode: TxnMode,
    state: TxnState,
    read_epoch: Timestamp,
    local_txn_id: i64,
    write_epoch: Timestamp,
    // Blocks allocated by this transaction, freed on abort.
    block_cache: Vec<(BlockPtr, u8)>,
    // Timestamp slots to stamp at commit, with their rollback values.
    timestamps_to_update: Vec<(TsSlot, Timestamp)>,
    vertex_ptr_cache: HashMap<VertexId, BlockPtr>,
    edge_ptr_cache: HashMap<(VertexId, Label), BlockPtr>,
    // Staged (num_entries, data_length) per touched edge block, published
    // atomically at commit.
    edge_size_cache: HashMap<BlockPtr, (u32, u32)>,
    new_vertex_cache: Vec<VertexId>,
    recycled_vertex_cache: VecDeque<VertexId>,
    locked_vertices: SmallVec<[VertexId; 8]>,
    wal: TxnWal,
}

impl<'g> Transaction<'g> {
    pub(crate) fn new(graph: &'g Graph, mode: TxnMode) -> Self {
        let commit_manager = graph.commit_manager();
        let read_epoch = commit_manager.begin_read();
        let (tentative_epoch, local_txn_id) = commit_manager.begin_write();
        // Batch writes are stamped with the snapshot epoch and become
        // visible to transactions begun afterwards.
        let write_epoch = match mode {
            TxnMode::Batch => read_epoch,
            _ => tentative_epoch,
        };
        debug!(?mode, txn = local_txn_id, epoch = read_epoch, "transaction started");
        Self {
            graph,
            mode,
            state: TxnState::Active,
            read_epoch,
            local_txn_id,
            write_epoch,
            block_cache: Vec::new(),
            timestamps_to_update: Vec::new(),
            vertex_ptr_cache: HashMap::new(),
            edge_ptr_cache: HashMap::new(),
            edge_size_cache: HashMap::new(),
            new_vertex_cache: Vec::new(),
            recycled_vertex_cache: VecDeque::new(),
            locked_vertices: SmallVec::new(),
            wal: TxnWal::default(),
        }
    }

    /// Snapshot epoch this transaction reads at.
    pub fn read_epoch(&self) -> Timestamp {
        self.read_epoch
    }

    fn is_batch(&self) -> bool {
        self.mode == TxnMode::Batch
    }

    fn check_valid(&self) -> Result<()> {
        match self.state {
            TxnState::Active => Ok(()),
            TxnState::Committed => Err(GraphError::InvalidTransaction("already committed")),
            TxnState::Aborted => Err(GraphError::InvalidTransaction("already aborted")),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.mode == TxnMode::ReadOnly {
            return Err(GraphError::InvalidTransaction("read-only transaction"));
        }
        Ok(())
    }

    fn check_vertex_id(&self, vertex: VertexId) -> Result<()> {
        if vertex >= self.graph.vertex_count() {
            return Err(GraphError::InvalidVertex(vertex));
        }
        Ok(())
    }

    fn cmp(&self, raw: Timestamp) -> std::cmp::Ordering {
        cmp_timestamp(raw, self.read_epoch, self.local_txn_id)
    }

    /// Acquires the vertex latch for the rest of this transaction. Failure
    /// to acquire means a concurrent writer owns the vertex: surfaced as
    /// the conflict fault.
    fn ensure_vertex_lock(&mut self, vertex: VertexId) -> Result<()> {
        if self.locked_vertices.contains(&vertex) {
            return Ok(());
        }
        if !self.graph.latches().try_lock(vertex) {
            return Err(GraphError::Conflict(format!("vertex {vertex} latch held")));
        }
        self.locked_vertices.push(vertex);
        Ok(())
    }

    fn release_locks(&mut self) {
        for &vertex in &self.locked_vertices {
            self.graph.latches().unlock(vertex);
        }
        self.locked_vertices.clear();
    }

    // ------------------------------------------------------------------
    // Vertex operations
    // ------------------------------------------------------------------

    /// Returns a fresh vertex id, preferring this transaction's recycled
    /// cache, then the global pool when `use_recycled` is set.
    pub fn new_vertex(&mut self, use_recycled: bool) -> Result<VertexId> {
        self.check_valid()?;
        self.check_writable()?;
        let graph = self.graph;
        let mut vertex = if self.is_batch() {
            None
        } else {
            self.recycled_vertex_cache.pop_front()
        };
        if vertex.is_none() && use_recycled {
            vertex = graph.recycled_ids().pop();
        }
        let vertex = match vertex {
            Some(vertex) => vertex,
            None => graph.allocate_vertex_id()?,
        };
        graph.clear_vertex_slots(vertex);
        if !self.is_batch() {
            self.new_vertex_cache.push(vertex);
            self.wal.new_vertex(vertex);
        }
        Ok(vertex)
    }

    /// Head pointer a writable transaction must build on, with the
    /// first-touch conflict check.
    fn writable_vertex_head(&mut self, vertex: VertexId) -> Result<BlockPtr> {
        self.ensure_vertex_lock(vertex)?;
        if let Some(&ptr) = self.vertex_ptr_cache.get(&vertex) {
            return Ok(ptr);
        }
        self.ensure_no_conflict_vertex(vertex)?;
        Ok(self.graph.vertex_head(vertex))
    }

    fn ensure_no_conflict_vertex(&self, vertex: VertexId) -> Result<()> {
        let head = self.graph.vertex_head(vertex);
        if let Some(block) = self.graph.block_manager().vertex_block(head) {
            if self.cmp(block.creation_time().load(Ordering::Acquire)).is_gt() {
                return Err(GraphError::Conflict(format!("vertex {vertex}")));
            }
        }
        Ok(())
    }

    /// Allocates and fills one vertex version; `None` data writes a
    /// tombstone. Staging is recorded for writable transactions.
    fn write_vertex_version(
        &mut self,
        vertex: VertexId,
        prev: BlockPtr,
        data: Option<&[u8]>,
    ) -> Result<BlockPtr> {
        let bm = self.graph.block_manager();
        let size = VERTEX_HEADER_LEN + data.map_or(0, <[u8]>::len);
        let order = size_to_order(size);
        let ptr = bm.alloc(order)?;
        let Some(view) = bm.vertex_block(ptr) else {
            return Err(GraphError::Corruption("allocator returned null block"));
        };
        view.fill(order, vertex, self.write_epoch, prev, data);
        self.graph.compact_table().record(vertex);
        if !self.is_batch() {
            self.block_cache.push((ptr, order));
            self.timestamps_to_update
                .push((view.creation_slot(), ROLLBACK_TOMBSTONE));
        }
        Ok(ptr)
    }

    /// Stores `data` as the new version of `vertex`.
    pub fn put_vertex(&mut self, vertex: VertexId, data: &[u8]) -> Result<()> {
        self.check_valid()?;
        self.check_writable()?;
        self.check_vertex_id(vertex)?;
        let graph = self.graph;
        if self.is_batch() {
            graph.latches().lock(vertex);
            let prev = graph.vertex_head(vertex);
            let result = self.write_vertex_version(vertex, prev, Some(data));
            if let Ok(ptr) = result {
                graph.publish_vertex_head(vertex, ptr);
            }
            graph.latches().unlock(vertex);
            result.map(|_| ())
        } else {
            let prev = self.writable_vertex_head(vertex)?;
            let ptr = self.write_vertex_version(vertex, prev, Some(data))?;
            self.vertex_ptr_cache.insert(vertex, ptr);
            self.wal.put_vertex(vertex, data);
            Ok(())
        }
    }

    /// Writes a tombstone version. Returns `true` iff the previously
    /// visible version existed and was not already a tombstone. With
    /// `recycle`, the id re-enters the pool (at commit for writable
    /// transactions, immediately in batch mode).
    pub fn del_vertex(&mut self, vertex: VertexId, recycle: bool) -> Result<bool> {
        self.check_valid()?;
        self.check_writable()?;
        self.check_vertex_id(vertex)?;
        let graph = self.graph;
        if self.is_batch() {
            graph.latches().lock(vertex);
            let prev = graph.vertex_head(vertex);
            let deleted = match self.del_vertex_version(vertex, prev) {
                Ok(deleted) => deleted,
                Err(err) => {
                    graph.latches().unlock(vertex);
                    return Err(err);
                }
            };
            if let Some(ptr) = deleted {
                graph.publish_vertex_head(vertex, ptr);
            }
            if recycle {
                graph.recycled_ids().push(vertex);
            }
            graph.latches().unlock(vertex);
            Ok(deleted.is_some())
        } else {
            let prev = self.writable_vertex_head(vertex)?;
            let deleted = self.del_vertex_version(vertex, prev)?;
            if let Some(ptr) = deleted {
                self.vertex_ptr_cache.insert(vertex, ptr);
            }
            self.wal.del_vertex(vertex, recycle);
            if recycle {
                self.recycled_vertex_cache.push_back(vertex);
            }
            Ok(deleted.is_some())
        }
    }

    fn del_vertex_version(&mut self, vertex: VertexId, prev: BlockPtr) -> Result<Option<BlockPtr>> {
        let live = self
            .graph
            .block_manager()
            .vertex_block(prev)
            .is_some_and(|block| !block.is_tombstone());
        if !live {
            return Ok(None);
        }
        self.write_vertex_version(vertex, prev, None).map(Some)
    }

    /// Returns the vertex data visible at this snapshot, or `None` when
    /// the vertex is absent or deleted.
    pub fn get_vertex(&self, vertex: VertexId) -> Result<Option<&[u8]>> {
        self.check_valid()?;
        if vertex >= self.graph.vertex_count() {
            return Ok(None);
        }
        let mut ptr = match self.mode {
            TxnMode::ReadWrite => self
                .vertex_ptr_cache
                .get(&vertex)
                .copied()
                .unwrap_or_else(|| self.graph.vertex_head(vertex)),
            _ => self.graph.vertex_head(vertex),
        };
        let bm = self.graph.block_manager();
        while let Some(block) = bm.vertex_block(ptr) {
            if self.cmp(block.creation_time().load(Ordering::Acquire)).is_le() {
                return Ok((!block.is_tombstone()).then(|| block.data()));
            }
            ptr = block.prev_pointer();
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Edge operations
    // ------------------------------------------------------------------

    /// Walks the label directory and the edge-block chain to the newest
    /// block visible at this snapshot.
    fn locate_edge_block(&self, src: VertexId, label: Label) -> BlockPtr {
        let bm = self.graph.block_manager();
        let Some(label_block) = bm.edge_label_block(self.graph.edge_label_head(src)) else {
            return BlockPtr::NULL;
        };
        let Some(slot) = label_block.find_label(label) else {
            return BlockPtr::NULL;
        };
        let mut ptr = label_block.entry_pointer(slot);
        while let Some(block) = bm.edge_block(ptr) {
            if self.cmp(block.creation_time().load(Ordering::Acquire)).is_le() {
                break;
            }
            ptr = block.prev_pointer();
        }
        ptr
    }

    /// Conflict witness check: a committed time newer than this
    /// transaction's snapshot means a committed writer got there first.
    fn ensure_no_conflict_edge(&self, src: VertexId, label: Label) -> Result<()> {
        let bm = self.graph.block_manager();
        let Some(label_block) = bm.edge_label_block(self.graph.edge_label_head(src)) else {
            return Ok(());
        };
        let Some(slot) = label_block.find_label(label) else {
            return Ok(());
        };
        if let Some(block) = bm.edge_block(label_block.entry_pointer(slot)) {
            if self.cmp(block.committed_time().load(Ordering::Acquire)).is_gt() {
                return Err(GraphError::Conflict(format!("{src}:{label}")));
            }
        }
        Ok(())
    }

    fn writable_edge_head(&mut self, src: VertexId, label: Label) -> Result<BlockPtr> {
        self.ensure_vertex_lock(src)?;
        if let Some(&ptr) = self.edge_ptr_cache.get(&(src, label)) {
            return Ok(ptr);
        }
        self.ensure_no_conflict_edge(src, label)?;
        let ptr = self.locate_edge_block(src, label);
        self.edge_ptr_cache.insert((src, label), ptr);
        Ok(ptr)
    }

    /// Head pointer for reads, honoring this transaction's own staged
    /// writes in writable mode.
    fn read_edge_head(&self, src: VertexId, label: Label) -> BlockPtr {
        if self.mode == TxnMode::ReadWrite {
            if let Some(&ptr) = self.edge_ptr_cache.get(&(src, label)) {
                return ptr;
            }
        }
        self.locate_edge_block(src, label)
    }

    /// `(num_entries, data_length)` for a block, honoring staged sizes.
    fn staged_sizes(&self, ptr: BlockPtr, block: &EdgeBlockView<'_>) -> (u32, u32) {
        if self.mode == TxnMode::ReadWrite {
            if let Some(&sizes) = self.edge_size_cache.get(&ptr) {
                return sizes;
            }
        }
        block.sizes()
    }

    /// Newest-first scan for the live entry with this destination.
    /// Returns `(entry_index, data_offset)`.
    fn find_edge(
        &self,
        block: &EdgeBlockView<'_>,
        dst: VertexId,
        num_entries: u32,
        data_length: u32,
    ) -> Option<(u32, u32)> {
        if let Some(bloom) = block.bloom() {
            if !bloom.find(dst) {
                return None;
            }
        }
        let mut offset = data_length;
        for index in (0..num_entries).rev() {
            let entry = block.entry(index);
            offset -= entry.length();
            if entry.dst() == dst
                && self.cmp(entry.creation_time().load(Ordering::Acquire)).is_le()
                && self.cmp(entry.deletion_time().load(Ordering::Acquire)).is_gt()
            {
                return Some((index, offset));
            }
        }
        None
    }

    /// Inserts an edge. Without `force_insert`, a prior live entry for the
    /// same destination is marked deleted at this write's epoch.
    pub fn put_edge(
        &mut self,
        src: VertexId,
        label: Label,
        dst: VertexId,
        data: &[u8],
        force_insert: bool,
    ) -> Result<()> {
        self.put_edge_impl(src, label, dst, data, UNVERSIONED, force_insert)
    }

    /// Inserts an edge carrying an application-assigned version (e.g. a
    /// block number) for logical-time range queries.
    pub fn put_edge_with_version(
        &mut self,
        src: VertexId,
        label: Label,
        dst: VertexId,
        data: &[u8],
        version: Timestamp,
        force_insert: bool,
    ) -> Result<()> {
        self.put_edge_impl(src, label, dst, data, version, force_insert)
    }

    fn put_edge_impl(
        &mut self,
        src: VertexId,
        label: Label,
        dst: VertexId,
        data: &[u8],
        version: Timestamp,
        force_insert: bool,
    ) -> Result<()> {
        self.check_valid()?;
        self.check_writable()?;
        self.check_vertex_id(src)?;
        self.check_vertex_id(dst)?;
        if self.is_batch() {
            self.graph.latches().lock(src);
            let result = self.put_edge_core(src, label, dst, data, version, force_insert);
            self.graph.latches().unlock(src);
            result
        } else {
            self.put_edge_core(src, label, dst, data, version, force_insert)
        }
    }

    fn put_edge_core(
        &mut self,
        src: VertexId,
        label: Label,
        dst: VertexId,
        data: &[u8],
        version: Timestamp,
        force_insert: bool,
    ) -> Result<()> {
        let graph = self.graph;
        let bm = graph.block_manager();
        let batch = self.is_batch();
        let entry_len = data.len() as u32;

        let mut pointer = if batch {
            self.locate_edge_block(src, label)
        } else {
            self.writable_edge_head(src, label)?
        };
        let mut block = bm.edge_block(pointer);
        let (mut num_entries, mut data_length) = match &block {
            Some(view) => self.staged_sizes(pointer, view),
            None => (0, 0),
        };

        let needs_growth = block
            .as_ref()
            .map_or(true, |view| !view.has_space(num_entries, data_length, entry_len));
        if needs_growth {
            let size = EDGE_HEADER_LEN as u64
                + (num_entries as u64 + 1) * EDGE_ENTRY_LEN as u64
                + data_length as u64
                + entry_len as u64;
            let mut order = size_to_order(size as usize);
            if order >= BLOOM_FILTER_THRESHOLD {
                order = size_to_order(size as usize + bloom_bytes(order));
            }
            let new_ptr = bm.alloc(order)?;
            let Some(new_block) = bm.edge_block(new_ptr) else {
                return Err(GraphError::Corruption("allocator returned null block"));
            };
            new_block.fill(order, src, self.write_epoch, pointer, self.write_epoch);
            if !batch {
                self.block_cache.push((new_ptr, order));
                self.timestamps_to_update
                    .push((new_block.creation_slot(), ROLLBACK_TOMBSTONE));
            }

            let mut new_entries = 0u32;
            let mut new_length = 0u32;
            if let Some(old_block) = &block {
                // Versioned inserts keep superseded entries so history
                // range queries survive block growth; the unversioned path
                // copies only entries still live at this snapshot.
                let keep_history = version != UNVERSIONED;
                let mut offset = 0u32;
                for index in 0..num_entries {
                    let entry = old_block.entry(index);
                    let len = entry.length();
                    let blob = old_block.data_slice(offset, len);
                    offset += len;
                    let deletion = entry.deletion_time().load(Ordering::Acquire);
                    if keep_history || self.cmp(deletion).is_gt() {
                        let creation = entry.creation_time().load(Ordering::Acquire);
                        let copied = new_block.append_entry(
                            entry.dst(),
                            blob,
                            creation,
                            deletion,
                            entry.version(),
                            new_entries,
                            new_length,
                        );
                        new_entries += 1;
                        new_length += len;
                        if !batch && creation == self.write_epoch {
                            self.timestamps_to_update
                                .push((copied.creation_slot(), ROLLBACK_TOMBSTONE));
                        }
                        if !batch && deletion == self.write_epoch {
                            self.timestamps_to_update
                                .push((copied.deletion_slot(), ROLLBACK_TOMBSTONE));
                        }
                    }
                }
            }
            new_block.set_sizes(new_entries, new_length);
            if batch {
                self.update_edge_label_block(src, label, new_ptr)?;
            }
            pointer = new_ptr;
            block = Some(new_block);
            num_entries = new_entries;
            data_length = new_length;
        }

        let Some(block) = block else {
            return Err(GraphError::Corruption("edge block missing after growth"));
        };

        if !force_insert {
            if let Some((index, _)) = self.find_edge(&block, dst, num_entries, data_length) {
                let superseded = block.entry(index);
                superseded
                    .deletion_time()
                    .store(self.write_epoch, Ordering::Release);
                if !batch {
                    self.timestamps_to_update
                        .push((superseded.deletion_slot(), ROLLBACK_TOMBSTONE));
                }
            }
        }

        let appended = block.append_entry(
            dst,
            data,
            self.write_epoch,
            ROLLBACK_TOMBSTONE,
            version,
            num_entries,
            data_length,
        );
        if batch {
            block.set_sizes(num_entries + 1, data_length + entry_len);
        } else {
            self.edge_size_cache
                .insert(pointer, (num_entries + 1, data_length + entry_len));
            self.timestamps_to_update
                .push((appended.creation_slot(), ROLLBACK_TOMBSTONE));
        }
        graph.compact_table().record(src);
        if !batch {
            self.edge_ptr_cache.insert((src, label), pointer);
            self.wal
                .put_edge(src, label, dst, force_insert, version, data);
        }
        Ok(())
    }

    /// Marks the live entry for `dst` deleted at this write's epoch.
    /// Returns `true` iff such an entry existed.
    pub fn del_edge(&mut self, src: VertexId, label: Label, dst: VertexId) -> Result<bool> {
        self.check_valid()?;
        self.check_writable()?;
        self.check_vertex_id(src)?;
        self.check_vertex_id(dst)?;
        if self.is_batch() {
            self.graph.latches().lock(src);
            let result = self.del_edge_core(src, label, dst);
            self.graph.latches().unlock(src);
            result
        } else {
            self.del_edge_core(src, label, dst)
        }
    }

    fn del_edge_core(&mut self, src: VertexId, label: Label, dst: VertexId) -> Result<bool> {
        let batch = self.is_batch();
        let pointer = if batch {
            self.locate_edge_block(src, label)
        } else {
            self.writable_edge_head(src, label)?
        };
        let Some(block) = self.graph.block_manager().edge_block(pointer) else {
            return Ok(false);
        };
        let (num_entries, data_length) = self.staged_sizes(pointer, &block);
        let found = self.find_edge(&block, dst, num_entries, data_length);
        if let Some((index, _)) = found {
            let entry = block.entry(index);
            entry
                .deletion_time()
                .store(self.write_epoch, Ordering::Release);
            if !batch {
                self.timestamps_to_update
                    .push((entry.deletion_slot(), ROLLBACK_TOMBSTONE));
            }
        }
        self.graph.compact_table().record(src);
        if !batch {
            self.edge_ptr_cache.insert((src, label), pointer);
            // Restage unchanged sizes so commit republishes the block and
            // advances its committed time, the conflict witness.
            self.edge_size_cache.insert(pointer, (num_entries, data_length));
            self.wal.del_edge(src, label, dst);
        }
        Ok(found.is_some())
    }

    /// Returns the data of the live edge `(src, label, dst)` at this
    /// snapshot.
    pub fn get_edge(&self, src: VertexId, label: Label, dst: VertexId) -> Result<Option<&[u8]>> {
        self.check_valid()?;
        if src >= self.graph.vertex_count() {
            return Ok(None);
        }
        let pointer = self.read_edge_head(src, label);
        let Some(block) = self.graph.block_manager().edge_block(pointer) else {
            return Ok(None);
        };
        let (num_entries, data_length) = self.staged_sizes(pointer, &block);
        Ok(self
            .find_edge(&block, dst, num_entries, data_length)
            .map(|(index, offset)| block.data_slice(offset, block.entry(index).length())))
    }

    /// History query: every entry for `dst` whose version lies in
    /// `[start, end]`, newest first, irrespective of deletion time.
    pub fn get_edge_with_version(
        &self,
        src: VertexId,
        label: Label,
        dst: VertexId,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<&[u8]>> {
        self.check_valid()?;
        let mut matches = Vec::new();
        if src >= self.graph.vertex_count() {
            return Ok(matches);
        }
        let pointer = self.read_edge_head(src, label);
        let Some(block) = self.graph.block_manager().edge_block(pointer) else {
            return Ok(matches);
        };
        let (num_entries, data_length) = self.staged_sizes(pointer, &block);
        if let Some(bloom) = block.bloom() {
            if !bloom.find(dst) {
                return Ok(matches);
            }
        }
        let mut offset = data_length;
        for index in (0..num_entries).rev() {
            let entry = block.entry(index);
            offset -= entry.length();
            if entry.dst() != dst {
                continue;
            }
            let version = entry.version();
            if self.cmp(entry.creation_time().load(Ordering::Acquire)).is_le()
                && start <= version
                && version <= end
            {
                matches.push(block.data_slice(offset, entry.length()));
            }
        }
        Ok(matches)
    }

    /// Iterates the live edges of `(src, label)` at this snapshot.
    pub fn get_edges(&self, src: VertexId, label: Label, reverse: bool) -> Result<EdgeIterator<'_>> {
        self.check_valid()?;
        if src >= self.graph.vertex_count() {
            return Ok(EdgeIterator::new(
                None,
                0,
                0,
                self.read_epoch,
                self.local_txn_id,
                reverse,
            ));
        }
        let pointer = self.read_edge_head(src, label);
        let block = self.graph.block_manager().edge_block(pointer);
        let (num_entries, data_length) = match &block {
            Some(view) => self.staged_sizes(pointer, view),
            None => (0, 0),
        };
        Ok(EdgeIterator::new(
            block,
            num_entries,
            data_length,
            self.read_epoch,
            self.local_txn_id,
            reverse,
        ))
    }

    /// Iterates every entry of `(src, label)` whose version lies in
    /// `[start, end]`, irrespective of deletion time.
    pub fn get_edges_with_version(
        &self,
        src: VertexId,
        label: Label,
        start: Timestamp,
        end: Timestamp,
        reverse: bool,
    ) -> Result<EdgeVersionIterator<'_>> {
        self.check_valid()?;
        if src >= self.graph.vertex_count() {
            return Ok(EdgeVersionIterator::new(
                None,
                0,
                0,
                self.read_epoch,
                self.local_txn_id,
                start,
                end,
                reverse,
            ));
        }
        let pointer = self.read_edge_head(src, label);
        let block = self.graph.block_manager().edge_block(pointer);
        let (num_entries, data_length) = match &block {
            Some(view) => self.staged_sizes(pointer, view),
            None => (0, 0),
        };
        Ok(EdgeVersionIterator::new(
            block,
            num_entries,
            data_length,
            self.read_epoch,
            self.local_txn_id,
            start,
            end,
            reverse,
        ))
    }

    /// Replaces the label's chain-head entry in place, or grows the label
    /// block when neither replacement nor in-place append fits.
    fn update_edge_label_block(
        &mut self,
        src: VertexId,
        label: Label,
        edge_ptr: BlockPtr,
    ) -> Result<()> {
        let graph = self.graph;
        let bm = graph.block_manager();
        let head = graph.edge_label_head(src);
        let existing = bm.edge_label_block(head);
        if let Some(block) = &existing {
            if let Some(slot) = block.find_label(label) {
                block.set_entry_pointer(slot, edge_ptr);
                return Ok(());
            }
            if block.try_append(label, edge_ptr) {
                return Ok(());
            }
        }
        let count = existing.as_ref().map_or(0, |block| block.num_entries());
        let size = LABEL_HEADER_LEN as u64 + (count + 1) * LABEL_ENTRY_LEN as u64;
        let order = size_to_order(size as usize);
        let new_ptr = bm.alloc(order)?;
        let Some(new_block) = bm.edge_label_block(new_ptr) else {
            return Err(GraphError::Corruption("allocator returned null block"));
        };
        new_block.fill(order, src, self.write_epoch, head);
        if !self.is_batch() {
            self.block_cache.push((new_ptr, order));
            self.timestamps_to_update
                .push((new_block.creation_slot(), ROLLBACK_TOMBSTONE));
        }
        if let Some(block) = &existing {
            for index in 0..block.num_entries() {
                let copied = new_block.try_append(block.entry_label(index), block.entry_pointer(index));
                debug_assert!(copied);
            }
        }
        let appended = new_block.try_append(label, edge_ptr);
        debug_assert!(appended);
        graph.publish_edge_label_head(src, new_ptr);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Publishes every staged write at a fresh commit epoch.
    ///
    /// With `wait_visible`, returns only after the visibility barrier has
    /// advanced over this commit, so a read begun afterwards observes it.
    /// Batch loaders publish eagerly; their commit just returns the
    /// snapshot epoch.
    pub fn commit(mut self, wait_visible: bool) -> Result<Timestamp> {
        self.check_valid()?;
        self.check_writable()?;
        if self.is_batch() {
            self.state = TxnState::Committed;
            return Ok(self.read_epoch);
        }
        let graph = self.graph;
        let ticket = match graph.commit_manager().register_commit(
            graph.wal(),
            self.wal.op_count(),
            self.wal.payload(),
        ) {
            Ok(ticket) => ticket,
            Err(err) => {
                warn!(error = %err, "wal registration failed; aborting");
                self.rollback_internal();
                return Err(err);
            }
        };
        let commit_epoch = ticket.epoch();

        // Install new edge-chain heads first: the only fallible publish
        // step. Until timestamps are stamped below, everything staged
        // remains pending and invisible, so a failure here finishes the
        // epoch empty and no partial commit can be observed.
        let installs: Vec<_> = self
            .edge_ptr_cache
            .iter()
            .map(|(&key, &ptr)| (key, ptr))
            .collect();
        for ((src, label), ptr) in installs {
            if ptr != self.locate_edge_block(src, label) {
                if let Err(err) = self.update_edge_label_block(src, label, ptr) {
                    graph.commit_manager().finish_commit(ticket, false);
                    self.release_locks();
                    self.state = TxnState::Aborted;
                    warn!(error = %err, "commit publication failed; staged writes stay invisible");
                    return Err(err);
                }
            }
        }

        for (&vertex, &ptr) in &self.vertex_ptr_cache {
            if graph.vertex_head(vertex) != ptr {
                graph.publish_vertex_head(vertex, ptr);
            }
        }
        for &vertex in &self.recycled_vertex_cache {
            graph.recycled_ids().push(vertex);
        }

        let staged: Vec<_> = self
            .edge_size_cache
            .iter()
            .map(|(&ptr, &sizes)| (ptr, sizes))
            .collect();
        for (ptr, (num_entries, data_length)) in staged {
            if let Some(block) = graph.block_manager().edge_block(ptr) {
                block.set_sizes(num_entries, data_length);
                let previous = block.committed_time().load(Ordering::Acquire);
                self.timestamps_to_update.push((block.committed_slot(), previous));
                block.committed_time().store(self.write_epoch, Ordering::Release);
            }
        }

        for &(slot, _) in &self.timestamps_to_update {
            graph.ts(slot).store(commit_epoch, Ordering::Release);
        }

        self.clear_caches();
        self.release_locks();
        self.state = TxnState::Committed;
        graph.commit_manager().finish_commit(ticket, wait_visible);
        debug!(epoch = commit_epoch, txn = self.local_txn_id, "transaction committed");
        Ok(commit_epoch)
    }

    /// Discards the transaction: restores every stamped timestamp, returns
    /// allocated ids to the pool, and frees staged blocks. No partial
    /// state remains visible.
    pub fn abort(mut self) {
        if self.state == TxnState::Active {
            self.rollback_internal();
        }
    }

    fn rollback_internal(&mut self) {
        let graph = self.graph;
        for &(slot, value) in &self.timestamps_to_update {
            graph.ts(slot).store(value, Ordering::Release);
        }
        for &vertex in &self.new_vertex_cache {
            graph.recycled_ids().push(vertex);
        }
        for &(ptr, order) in &self.block_cache {
            graph.block_manager().free(ptr, order);
        }
        self.clear_caches();
        self.release_locks();
        self.state = TxnState::Aborted;
        debug!(txn = self.local_txn_id, "transaction aborted");
    }

    fn clear_caches(&mut self) {
        self.block_cache.clear();
        self.timestamps_to_update.clear();
        self.vertex_ptr_cache.clear();
        self.edge_ptr_cache.clear();
        self.edge_size_cache.clear();
        self.new_vertex_cache.clear();
        self.recycled_vertex_cache.clear();
        self.wal.clear();
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxnState::Active && self.mode == TxnMode::ReadWrite {
            if !self.wal.is_empty() {
                warn!(txn = self.local_txn_id, "active transaction dropped; rolling back");
            }
            self.rollback_internal();
        }
    }
}
