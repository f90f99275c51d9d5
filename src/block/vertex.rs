use std::sync::atomic::AtomicI64;

use super::arena::Arena;
use super::manager::BlockPtr;
use super::TsSlot;
use crate::types::{Timestamp, VertexId};

/// Fixed header: order, vertex id, creation time, previous version, length.
pub const VERTEX_HEADER_LEN: usize = 40;

/// Sentinel `length` marking a deleted vertex version.
pub const VERTEX_TOMBSTONE: u64 = u64::MAX;

const OFF_ORDER: u64 = 0;
const OFF_VERTEX_ID: u64 = 8;
const OFF_CREATION: u64 = 16;
const OFF_PREV: u64 = 24;
const OFF_LENGTH: u64 = 32;

/// View over one version of a vertex. Versions chain newest-first through
/// `prev_pointer`; the head is published in the graph directory.
#[derive(Clone, Copy)]
pub struct VertexView<'a> {
    arena: &'a Arena,
    offset: u64,
}

impl<'a> VertexView<'a> {
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

    pub fn length(&self) -> u64 {
        self.arena.read_u64(self.offset + OFF_LENGTH)
    }

    pub fn is_tombstone(&self) -> bool {
        self.length() == VERTEX_TOMBSTONE
    }

    pub fn data(&self) -> &'a [u8] {
        let length = self.length();
        if length == VERTEX_TOMBSTONE {
            &[]
        } else {
            self.arena
                .bytes(self.offset + VERTEX_HEADER_LEN as u64, length as usize)
        }
    }

    /// Initializes a freshly allocated block. `data == None` writes a
    /// tombstone version. The block must not be reachable yet; publication
    /// happens through the directory or the transaction's commit.
    pub fn fill(
        &self,
        order: u8,
        vertex_id: VertexId,
        creation_time: Timestamp,
        prev_pointer: BlockPtr,
        data: Option<&[u8]>,
    ) {
        self.arena.write_u16(self.offset + OFF_ORDER, order as u16);
        self.arena.write_u64(self.offset + OFF_VERTEX_ID, vertex_id);
        self.arena.write_i64(self.offset + OFF_CREATION, creation_time);
        self.arena.write_u64(self.offset + OFF_PREV, prev_pointer.raw());
        match data {
            Some(data) => {
                self.arena
                    .write_u64(self.offset + OFF_LENGTH, data.len() as u64);
                self.arena
                    .write_bytes(self.offset + VERTEX_HEADER_LEN as u64, data);
            }
            None => {
                self.arena
                    .write_u64(self.offset + OFF_LENGTH, VERTEX_TOMBSTONE);
            }
        }
    }
}
