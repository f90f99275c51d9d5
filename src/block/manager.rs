use std::path::Path;

use parking_lot::Mutex;
use tracing::warn;

use super::arena::Arena;
use super::edge::EdgeBlockView;
use super::label::EdgeLabelView;
use super::vertex::VertexView;
use crate::error::{GraphError, Result};

/// Smallest allocation order handed out by the buddy allocator.
pub const MIN_ORDER: u8 = 6;

/// Opaque token referencing a block inside the arena; offset 0 is reserved
/// at startup so the zero token is the distinguished null pointer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct BlockPtr(u64);

impl BlockPtr {
    pub const NULL: BlockPtr = BlockPtr(0);

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub(crate) const fn raw(self) -> u64 {
        self.0
    }
}

impl Default for BlockPtr {
    fn default() -> Self {
        Self::NULL
    }
}

struct FreeLists {
    // One free list per order; lists[k] holds offsets of free 2^k blocks.
    lists: Vec<Vec<u64>>,
}

/// Buddy allocator over the block arena.
///
/// `alloc` splits the smallest sufficient free block down to the requested
/// order; `free` merges buddies back up. Both are O(log range). Addresses
/// are stable for the lifetime of the manager.
pub struct BlockManager {
    arena: Arena,
    free: Mutex<FreeLists>,
    max_order: u8,
}

impl BlockManager {
    /// Opens the arena file and seeds the allocator with one top-level
    /// block. The first minimum-order block is reserved so that offset 0
    /// never escapes as a live pointer.
    pub fn open(path: &Path, capacity: usize) -> Result<Self> {
        let capacity = capacity
            .max(1usize << (MIN_ORDER + 1))
            .next_power_of_two();
        let arena = Arena::open(path, capacity)?;
        let max_order = capacity.trailing_zeros() as u8;
        let mut lists = vec![Vec::new(); max_order as usize + 1];
        lists[max_order as usize].push(0);
        let manager = Self {
            arena,
            free: Mutex::new(FreeLists { lists }),
            max_order,
        };
        let reserved = manager.alloc(MIN_ORDER)?;
        debug_assert!(reserved.is_null());
        Ok(manager)
    }

    pub(crate) fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Allocates a `2^order` block and returns its pointer token.
    pub fn alloc(&self, order: u8) -> Result<BlockPtr> {
        let order = order.max(MIN_ORDER);
        if order > self.max_order {
            return Err(GraphError::Alloc("request exceeds arena capacity"));
        }
        let mut free = self.free.lock();
        let mut k = order;
        while (k as usize) < free.lists.len() && free.lists[k as usize].is_empty() {
            k += 1;
        }
        if k > self.max_order {
            warn!(order, "block arena exhausted");
            return Err(GraphError::Alloc("block arena exhausted"));
        }
        let Some(mut offset) = free.lists[k as usize].pop() else {
            return Err(GraphError::Corruption("buddy free list empty after scan"));
        };
        while k > order {
            k -= 1;
            free.lists[k as usize].push(offset + (1u64 << k));
        }
        Ok(BlockPtr(offset))
    }

    /// Returns a block to the allocator, merging with its buddy while the
    /// buddy is also free.
    pub fn free(&self, ptr: BlockPtr, order: u8) {
        let order = order.max(MIN_ORDER);
        let mut free = self.free.lock();
        let mut offset = ptr.0;
        let mut k = order;
        while k < self.max_order {
            let buddy = offset ^ (1u64 << k);
            let list = &mut free.lists[k as usize];
            match list.iter().position(|&candidate| candidate == buddy) {
                Some(pos) => {
                    list.swap_remove(pos);
                    offset &= !(1u64 << k);
                    k += 1;
                }
                None => break,
            }
        }
        free.lists[k as usize].push(offset);
    }

    fn checked(&self, ptr: BlockPtr) -> Option<u64> {
        if ptr.is_null() || ptr.0 >= self.arena.capacity() as u64 {
            None
        } else {
            Some(ptr.0)
        }
    }

    /// Derives a vertex-block view, or `None` for the null pointer.
    pub fn vertex_block(&self, ptr: BlockPtr) -> Option<VertexView<'_>> {
        self.checked(ptr).map(|offset| VertexView::new(&self.arena, offset))
    }

    /// Derives an edge-label-block view, or `None` for the null pointer.
    pub fn edge_label_block(&self, ptr: BlockPtr) -> Option<EdgeLabelView<'_>> {
        self.checked(ptr)
            .map(|offset| EdgeLabelView::new(&self.arena, offset))
    }

    /// Derives an edge-block view, or `None` for the null pointer.
    pub fn edge_block(&self, ptr: BlockPtr) -> Option<EdgeBlockView<'_>> {
        self.checked(ptr)
            .map(|offset| EdgeBlockView::new(&self.arena, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(capacity: usize) -> (tempfile::TempDir, BlockManager) {
        let dir = tempdir().unwrap();
        let m = BlockManager::open(&dir.path().join("blocks"), capacity).unwrap();
        (dir, m)
    }

    #[test]
    fn null_pointer_is_never_allocated() {
        let (_dir, m) = manager(1 << 12);
        for _ in 0..8 {
            let ptr = m.alloc(MIN_ORDER).unwrap();
            assert!(!ptr.is_null());
        }
    }

    #[test]
    fn split_and_merge_round_trip() {
        let (_dir, m) = manager(1 << 12);
        let a = m.alloc(6).unwrap();
        let b = m.alloc(7).unwrap();
        let c = m.alloc(6).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        m.free(a, 6);
        m.free(c, 6);
        m.free(b, 7);
        // After merging everything back, a top-level allocation succeeds
        // again apart from the reserved null slot.
        let big = m.alloc(11).unwrap();
        assert!(!big.is_null());
    }

    #[test]
    fn exhaustion_is_reported() {
        let (_dir, m) = manager(1 << 10);
        let mut held = Vec::new();
        loop {
            match m.alloc(MIN_ORDER) {
                Ok(ptr) => held.push(ptr),
                Err(GraphError::Alloc(_)) => break,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        // Whole arena minus the reserved null block.
        assert_eq!(held.len(), (1 << 10) / (1 << MIN_ORDER) - 1);
        for ptr in held {
            m.free(ptr, MIN_ORDER);
        }
        assert!(m.alloc(9).is_ok());
    }

    #[test]
    fn oversized_requests_fail() {
        let (_dir, m) = manager(1 << 12);
        assert!(m.alloc(13).is_err());
    }
}
