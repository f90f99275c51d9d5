use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use tracing::{debug, info};

use crate::block::{BlockManager, BlockPtr, TsSlot};
use crate::compact::CompactTable;
use crate::epoch::CommitManager;
use crate::error::{GraphError, Result};
use crate::latch::{RecycledIds, VertexLatches};
use crate::txn::{Transaction, TxnMode};
use crate::types::VertexId;
use crate::wal::{decode_ops, Wal, WalFrame, WalOp};

/// Tunables for [`Graph::open_with_config`].
#[derive(Clone, Debug)]
pub struct GraphConfig {
    /// Byte capacity of the block arena (rounded up to a power of two).
    pub arena_capacity: usize,
    /// Upper bound on vertex ids; sizes the directory and latch tables.
    pub max_vertices: usize,
    /// Fsync the WAL on every commit registration.
    pub sync_on_commit: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            arena_capacity: 1 << 28,
            max_vertices: 1 << 20,
            sync_on_commit: true,
        }
    }
}

/// The store: block arena, commit manager, WAL, and the per-vertex
/// directory (newest vertex block and edge-label block heads).
///
/// Directory slots are published with release stores and read with
/// acquire loads, so readers never block on writers. All transaction
/// state lives in [`Transaction`]; `Graph` is shared by reference across
/// threads.
pub struct Graph {
    block_manager: BlockManager,
    commit_manager: CommitManager,
    wal: Wal,
    vertex_ptrs: Box<[AtomicU64]>,
    edge_label_ptrs: Box<[AtomicU64]>,
    latches: VertexLatches,
    recycled_ids: RecycledIds,
    next_vertex_id: AtomicU64,
    compact_table: CompactTable,
    max_vertices: usize,
}

impl Graph {
    /// Opens (or creates) a graph backed by the given block arena and WAL
    /// files, replaying any durable commits found in the log.
    pub fn open(block_path: &Path, wal_path: &Path) -> Result<Self> {
        Self::open_with_config(block_path, wal_path, GraphConfig::default())
    }

    pub fn open_with_config(
        block_path: &Path,
        wal_path: &Path,
        config: GraphConfig,
    ) -> Result<Self> {
        let block_manager = BlockManager::open(block_path, config.arena_capacity)?;
        let (wal, frames) = Wal::open(wal_path, config.sync_on_commit)?;
        let last_epoch = frames.last().map(|frame| frame.epoch).unwrap_or(0);

        let graph = Self {
            block_manager,
            commit_manager: CommitManager::new(last_epoch),
            wal,
            vertex_ptrs: (0..config.max_vertices).map(|_| AtomicU64::new(0)).collect(),
            edge_label_ptrs: (0..config.max_vertices).map(|_| AtomicU64::new(0)).collect(),
            latches: VertexLatches::new(config.max_vertices),
            recycled_ids: RecycledIds::new(),
            next_vertex_id: AtomicU64::new(0),
            compact_table: CompactTable::new(),
            max_vertices: config.max_vertices,
        };
        if !frames.is_empty() {
            graph.replay(&frames)?;
        }
        info!(
            replayed = frames.len(),
            read_epoch = graph.commit_manager.begin_read(),
            "graph opened"
        );
        Ok(graph)
    }

    /// Re-executes durable commits under a batch loader, in epoch order.
    ///
    /// Recycled ids are tracked on the side: an id freed with `recycle`
    /// and later re-issued by a replayed `NewVertex` must not reach the
    /// pool again, so only ids still free at the end are pushed.
    fn replay(&self, frames: &[WalFrame]) -> Result<()> {
        let mut loader = self.begin_batch_loader();
        let mut recycled: Vec<VertexId> = Vec::new();
        for frame in frames {
            for op in decode_ops(&frame.payload, frame.op_count)? {
                match op {
                    WalOp::NewVertex { vertex } => {
                        self.restore_vertex(vertex)?;
                        recycled.retain(|&freed| freed != vertex);
                    }
                    WalOp::PutVertex { vertex, data } => loader.put_vertex(vertex, &data)?,
                    WalOp::DelVertex { vertex, recycle } => {
                        loader.del_vertex(vertex, false)?;
                        if recycle {
                            recycled.push(vertex);
                        }
                    }
                    WalOp::PutEdge {
                        src,
                        label,
                        dst,
                        force_insert,
                        version,
                        data,
                    } => loader.put_edge_with_version(src, label, dst, &data, version, force_insert)?,
                    WalOp::DelEdge { src, label, dst } => {
                        loader.del_edge(src, label, dst)?;
                    }
                }
            }
        }
        let epoch = loader.commit(true)?;
        for vertex in recycled {
            self.recycled_ids.push(vertex);
        }
        debug!(frames = frames.len(), epoch, "wal replay complete");
        Ok(())
    }

    /// Begins a writable transaction: buffered, conflict-checked, WAL-emitting.
    pub fn begin_transaction(&self) -> Transaction<'_> {
        Transaction::new(self, TxnMode::ReadWrite)
    }

    /// Begins a read-only transaction observing the current visibility barrier.
    pub fn begin_read_only_transaction(&self) -> Transaction<'_> {
        Transaction::new(self, TxnMode::ReadOnly)
    }

    /// Begins a batch loader: publishes directly under held latches, skips
    /// conflict checks and the WAL. Must not run concurrently with writable
    /// transactions on overlapping vertices.
    pub fn begin_batch_loader(&self) -> Transaction<'_> {
        Transaction::new(self, TxnMode::Batch)
    }

    /// Drains the compaction candidates accumulated by writes; intended for
    /// the external background compactor.
    pub fn compact_candidates(&self) -> HashSet<VertexId> {
        self.compact_table.drain()
    }

    pub(crate) fn block_manager(&self) -> &BlockManager {
        &self.block_manager
    }

    pub(crate) fn commit_manager(&self) -> &CommitManager {
        &self.commit_manager
    }

    pub(crate) fn wal(&self) -> &Wal {
        &self.wal
    }

    pub(crate) fn latches(&self) -> &VertexLatches {
        &self.latches
    }

    pub(crate) fn recycled_ids(&self) -> &RecycledIds {
        &self.recycled_ids
    }

    pub(crate) fn compact_table(&self) -> &CompactTable {
        &self.compact_table
    }

    pub(crate) fn vertex_count(&self) -> u64 {
        self.next_vertex_id.load(Ordering::Relaxed)
    }

    pub(crate) fn allocate_vertex_id(&self) -> Result<VertexId> {
        let vertex = self.next_vertex_id.fetch_add(1, Ordering::Relaxed);
        if vertex as usize >= self.max_vertices {
            return Err(GraphError::Alloc("vertex directory exhausted"));
        }
        Ok(vertex)
    }

    /// Reinstates a vertex id recovered from the log, bumping the counter
    /// past it and clearing both directory slots.
    pub(crate) fn restore_vertex(&self, vertex: VertexId) -> Result<()> {
        if vertex as usize >= self.max_vertices {
            return Err(GraphError::Alloc("vertex directory exhausted"));
        }
        self.next_vertex_id.fetch_max(vertex + 1, Ordering::Relaxed);
        self.clear_vertex_slots(vertex);
        Ok(())
    }

    pub(crate) fn clear_vertex_slots(&self, vertex: VertexId) {
        self.vertex_ptrs[vertex as usize].store(BlockPtr::NULL.raw(), Ordering::Release);
        self.edge_label_ptrs[vertex as usize].store(BlockPtr::NULL.raw(), Ordering::Release);
    }

    pub(crate) fn vertex_head(&self, vertex: VertexId) -> BlockPtr {
        BlockPtr::from_raw(self.vertex_ptrs[vertex as usize].load(Ordering::Acquire))
    }

    pub(crate) fn publish_vertex_head(&self, vertex: VertexId, ptr: BlockPtr) {
        self.vertex_ptrs[vertex as usize].store(ptr.raw(), Ordering::Release);
    }

    pub(crate) fn edge_label_head(&self, vertex: VertexId) -> BlockPtr {
        BlockPtr::from_raw(self.edge_label_ptrs[vertex as usize].load(Ordering::Acquire))
    }

    pub(crate) fn publish_edge_label_head(&self, vertex: VertexId, ptr: BlockPtr) {
        self.edge_label_ptrs[vertex as usize].store(ptr.raw(), Ordering::Release);
    }

    pub(crate) fn ts(&self, slot: TsSlot) -> &AtomicI64 {
        self.block_manager.arena().atomic_i64(slot.0)
    }
}
