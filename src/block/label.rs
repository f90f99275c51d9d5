use std::sync::atomic::{AtomicI64, Ordering};

use super::arena::Arena;
use super::manager::BlockPtr;
use super::TsSlot;
use crate::types::{Label, Timestamp, VertexId};

/// Fixed header: order, vertex id, creation time, previous block, entries.
pub const LABEL_HEADER_LEN: usize = 40;
/// Entry: label word plus the head pointer of that label's edge chain.
pub const LABEL_ENTRY_LEN: usize = 16;

const OFF_ORDER: u64 = 0;
const OFF_VERTEX_ID: u64 = 8;
const OFF_CREATION: u64 = 16;
const OFF_PREV: u64 = 24;
const OFF_NUM_ENTRIES: u64 = 32;

/// View over a vertex's label directory: a small array mapping each edge
/// label to the head of its edge-block chain.
///
/// Appends write the slot first and publish the entry count with a release
/// store; pointer slots are atomics so a committing writer can retarget a
/// label in place under the vertex latch while readers scan.
#[derive(Clone, Copy)]
pub struct EdgeLabelView<'a> {
    arena: &'a Arena,
    offset: u64,
}

impl<'a> EdgeLabelView<'a> {
    pub(crate) fn new(arena: &'a Arena, offset: u64) -> Self {
        Self { arena, offset }
    }

    pub fn order(&self) -> u8 {
        self.arena.read_u16(self.offset + OFF_ORDER) as u8
    }

    pub fn vertex_id(&self) -> VertexId {
        self.arena.read_u64(self.offset + OFF_VERTEX_ID)
    }

    pub fn creation_time(&self) -> &'a AtomicI64 {
        self.arena.atomic_i64(self.offset + OFF_CREATION)
    }

    pub fn creation_slot(&self) -> TsSlot {
        TsSlot(self.offset + OFF_CREATION)
    }

    pub fn prev_pointer(&self) -> BlockPtr {
        BlockPtr::from_raw(self.arena.read_u64(self.offset + OFF_PREV))
    }

    pub fn num_entries(&self) -> u64 {
        self.arena
            .atomic_u64(self.offset + OFF_NUM_ENTRIES)
            .load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> u64 {
        ((1u64 << self.order()) - LABEL_HEADER_LEN as u64) / LABEL_ENTRY_LEN as u64
    }

    fn entry_offset(&self, index: u64) -> u64 {
        self.offset + LABEL_HEADER_LEN as u64 + index * LABEL_ENTRY_LEN as u64
    }

    pub fn entry_label(&self, index: u64) -> Label {
        self.arena.read_u64(self.entry_offset(index)) as Label
    }

    pub fn entry_pointer(&self, index: u64) -> BlockPtr {
        BlockPtr::from_raw(
            self.arena
                .atomic_u64(self.entry_offset(index) + 8)
                .load(Ordering::Acquire),
        )
    }

    /// Retargets an existing label at its edge chain's new head.
    pub fn set_entry_pointer(&self, index: u64, pointer: BlockPtr) {
        self.arena
            .atomic_u64(self.entry_offset(index) + 8)
            .store(pointer.raw(), Ordering::Release);
    }

    /// Appends a label entry in place when capacity allows. The slot is
    /// written before the count is published, so concurrent readers either
    /// miss the entry or see it fully initialized.
    pub fn try_append(&self, label: Label, pointer: BlockPtr) -> bool {
        let count = self.num_entries();
        if count >= self.capacity() {
            return false;
        }
        let slot = self.entry_offset(count);
        self.arena.write_u64(slot, label as u64);
        self.arena
            .atomic_u64(slot + 8)
            .store(pointer.raw(), Ordering::Relaxed);
        self.arena
            .atomic_u64(self.offset + OFF_NUM_ENTRIES)
            .store(count + 1, Ordering::Release);
        true
    }

    /// Looks up the slot index holding `label`.
    pub fn find_label(&self, label: Label) -> Option<u64> {
        (0..self.num_entries()).find(|&i| self.entry_label(i) == label)
    }

    pub fn fill(
        &self,
        order: u8,
        vertex_id: VertexId,
        creation_time: Timestamp,
        prev_pointer: BlockPtr,
    ) {
        self.arena.write_u16(self.offset + OFF_ORDER, order as u16);
        self.arena.write_u64(self.offset + OFF_VERTEX_ID, vertex_id);
        self.arena.write_i64(self.offset + OFF_CREATION, creation_time);
        self.arena.write_u64(self.offset + OFF_PREV, prev_pointer.raw());
        self.arena.write_u64(self.offset + OFF_NUM_ENTRIES, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_until_capacity_then_refuse() {
        let dir = tempdir().unwrap();
        let arena = Arena::open(&dir.path().join("arena.blk"), 1 << 12).unwrap();
        let view = EdgeLabelView::new(&arena, 64);
        view.fill(7, 1, 5, BlockPtr::NULL);
        // Order 7 = 128 bytes: (128 - 40) / 16 = 5 entries.
        assert_eq!(view.capacity(), 5);
        for label in 0..5u16 {
            assert!(view.try_append(label, BlockPtr::from_raw(256 + label as u64 * 64)));
        }
        assert!(!view.try_append(9, BlockPtr::from_raw(1024)));
        assert_eq!(view.num_entries(), 5);
        assert_eq!(view.find_label(3), Some(3));
        assert_eq!(view.find_label(9), None);
        assert_eq!(view.entry_pointer(2), BlockPtr::from_raw(256 + 2 * 64));
    }

    #[test]
    fn pointers_can_be_retargeted_in_place() {
        let dir = tempdir().unwrap();
        let arena = Arena::open(&dir.path().join("arena.blk"), 1 << 12).unwrap();
        let view = EdgeLabelView::new(&arena, 64);
        view.fill(7, 1, 5, BlockPtr::NULL);
        view.try_append(4, BlockPtr::from_raw(128));
        view.set_entry_pointer(0, BlockPtr::from_raw(512));
        assert_eq!(view.entry_pointer(0), BlockPtr::from_raw(512));
        assert_eq!(view.entry_label(0), 4);
    }
}
