use std::hash::Hasher;
use std::sync::atomic::Ordering;

use siphasher::sip::SipHasher13;

use super::arena::Arena;
use crate::types::VertexId;

const PROBES: [(u64, u64); 2] = [
    (0x9e37_79b9_7f4a_7c15, 0xf39c_c060_5ced_c834),
    (0x1082_276b_f3a2_7251, 0x7f4a_7c15_9e37_79b9),
];

/// View over the keyed-hash Bloom filter embedded in an edge block's tail.
///
/// Soundness is the contract: `find` returning `false` guarantees no entry
/// with that destination was ever appended to the block. Bits are set with
/// relaxed atomics; the release publication of the block's size word orders
/// them before any reader that can observe the entry.
#[derive(Clone, Copy)]
pub struct BloomView<'a> {
    arena: &'a Arena,
    offset: u64,
    len: usize,
}

impl<'a> BloomView<'a> {
    pub(crate) fn new(arena: &'a Arena, offset: u64, len: usize) -> Self {
        debug_assert!(len.is_power_of_two());
        Self { arena, offset, len }
    }

    fn probe(&self, dst: VertexId, keys: (u64, u64)) -> (u64, u8) {
        let mut hasher = SipHasher13::new_with_keys(keys.0, keys.1);
        hasher.write_u64(dst);
        let bit = hasher.finish() & (self.len as u64 * 8 - 1);
        (self.offset + bit / 8, 1u8 << (bit % 8))
    }

    pub fn insert(&self, dst: VertexId) {
        for keys in PROBES {
            let (byte, mask) = self.probe(dst, keys);
            self.arena.atomic_u8(byte).fetch_or(mask, Ordering::Relaxed);
        }
    }

    /// `false` means the destination is definitely absent from the block.
    pub fn find(&self, dst: VertexId) -> bool {
        PROBES.into_iter().all(|keys| {
            let (byte, mask) = self.probe(dst, keys);
            self.arena.atomic_u8(byte).load(Ordering::Relaxed) & mask != 0
        })
    }

    pub(crate) fn clear(&self) {
        self.arena.zero(self.offset, self.len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn inserted_keys_are_found_and_absent_keys_mostly_not() {
        let dir = tempdir().unwrap();
        let arena = Arena::open(&dir.path().join("arena.blk"), 1 << 12).unwrap();
        let bloom = BloomView::new(&arena, 0, 256);
        bloom.clear();

        for dst in 0..64u64 {
            bloom.insert(dst);
        }
        for dst in 0..64u64 {
            assert!(bloom.find(dst), "inserted key {dst} must be found");
        }
        let false_positives = (1000..2000u64).filter(|&dst| bloom.find(dst)).count();
        assert!(
            false_positives < 200,
            "filter too saturated: {false_positives} false positives"
        );
    }

    #[test]
    fn clear_resets_all_bits() {
        let dir = tempdir().unwrap();
        let arena = Arena::open(&dir.path().join("arena.blk"), 1 << 12).unwrap();
        let bloom = BloomView::new(&arena, 64, 64);
        bloom.insert(17);
        assert!(bloom.find(17));
        bloom.clear();
        assert!(!bloom.find(17));
    }
}
