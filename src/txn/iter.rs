use std::sync::atomic::Ordering;

use crate::block::EdgeBlockView;
use crate::types::{cmp_timestamp, Timestamp, VertexId};

/// One visible edge yielded by an iterator, borrowing its data blob from
/// the block arena.
#[derive(Debug, Clone, Copy)]
pub struct EdgeRef<'a> {
    pub dst: VertexId,
    pub data: &'a [u8],
    pub creation_time: Timestamp,
    pub deletion_time: Timestamp,
    pub version: Timestamp,
}

/// Cursor over one edge block's entries in insertion order or reverse.
struct EdgeCursor<'a> {
    block: Option<EdgeBlockView<'a>>,
    num_entries: u32,
    reverse: bool,
    // Forward cursor: next index and its data offset.
    fwd_index: u32,
    fwd_offset: u32,
    // Reverse cursor: one past the next index, and the end of its blob.
    rev_index: u32,
    rev_offset: u32,
}

impl<'a> EdgeCursor<'a> {
    fn new(block: Option<EdgeBlockView<'a>>, num_entries: u32, data_length: u32, reverse: bool) -> Self {
        Self {
            block,
            num_entries,
            reverse,
            fwd_index: 0,
            fwd_offset: 0,
            rev_index: num_entries,
            rev_offset: data_length,
        }
    }

    fn step(&mut self) -> Option<(EdgeBlockView<'a>, u32, u32, u32)> {
        let block = self.block?;
        if self.reverse {
            if self.rev_index == 0 {
                return None;
            }
            self.rev_index -= 1;
            let len = block.entry(self.rev_index).length();
            self.rev_offset -= len;
            Some((block, self.rev_index, self.rev_offset, len))
        } else {
            if self.fwd_index == self.num_entries {
                return None;
            }
            let index = self.fwd_index;
            let len = block.entry(index).length();
            let offset = self.fwd_offset;
            self.fwd_index += 1;
            self.fwd_offset += len;
            Some((block, index, offset, len))
        }
    }
}

/// Iterator over the live edges of one `(src, label)` at the transaction's
/// snapshot, in insertion order (or reverse).
pub struct EdgeIterator<'a> {
    cursor: EdgeCursor<'a>,
    read_epoch: Timestamp,
    local_txn_id: i64,
}

impl<'a> EdgeIterator<'a> {
    pub(crate) fn new(
        block: Option<EdgeBlockView<'a>>,
        num_entries: u32,
        data_length: u32,
        read_epoch: Timestamp,
        local_txn_id: i64,
        reverse: bool,
    ) -> Self {
        Self {
            cursor: EdgeCursor::new(block, num_entries, data_length, reverse),
            read_epoch,
            local_txn_id,
        }
    }
}

impl<'a> Iterator for EdgeIterator<'a> {
    type Item = EdgeRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((block, index, offset, len)) = self.cursor.step() {
            let entry = block.entry(index);
            let creation = entry.creation_time().load(Ordering::Acquire);
            let deletion = entry.deletion_time().load(Ordering::Acquire);
            if cmp_timestamp(creation, self.read_epoch, self.local_txn_id).is_le()
                && cmp_timestamp(deletion, self.read_epoch, self.local_txn_id).is_gt()
            {
                return Some(EdgeRef {
                    dst: entry.dst(),
                    data: block.data_slice(offset, len),
                    creation_time: creation,
                    deletion_time: deletion,
                    version: entry.version(),
                });
            }
        }
        None
    }
}

/// History iterator over one `(src, label)`: yields entries whose version
/// lies in `[start, end]`, ignoring deletion time (logical time, not
/// transactional time).
pub struct EdgeVersionIterator<'a> {
    cursor: EdgeCursor<'a>,
    read_epoch: Timestamp,
    local_txn_id: i64,
    start: Timestamp,
    end: Timestamp,
}

impl<'a> EdgeVersionIterator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        block: Option<EdgeBlockView<'a>>,
        num_entries: u32,
        data_length: u32,
        read_epoch: Timestamp,
        local_txn_id: i64,
        start: Timestamp,
        end: Timestamp,
        reverse: bool,
    ) -> Self {
        Self {
            cursor: EdgeCursor::new(block, num_entries, data_length, reverse),
            read_epoch,
            local_txn_id,
            start,
            end,
        }
    }
}

impl<'a> Iterator for EdgeVersionIterator<'a> {
    type Item = EdgeRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((block, index, offset, len)) = self.cursor.step() {
            let entry = block.entry(index);
            let creation = entry.creation_time().load(Ordering::Acquire);
            let version = entry.version();
            if cmp_timestamp(creation, self.read_epoch, self.local_txn_id).is_le()
                && self.start <= version
                && version <= self.end
            {
                return Some(EdgeRef {
                    dst: entry.dst(),
                    data: block.data_slice(offset, len),
                    creation_time: creation,
                    deletion_time: entry.deletion_time().load(Ordering::Acquire),
                    version,
                });
            }
        }
        None
    }
}
