#![allow(unsafe_code)]

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8};

use memmap2::MmapMut;

use crate::error::{GraphError, Result};

/// File-backed byte arena with stable addresses for its whole lifetime.
///
/// All block memory lives here. Offsets are handed out by the buddy
/// allocator and converted into typed views by [`super::BlockManager`];
/// every access is bounds-checked against the mapping.
///
/// Safety protocol: a block's plain (non-atomic) fields are written only
/// while the block is unreachable (freshly allocated) or while the owning
/// vertex latch is held, and are published to readers through a
/// release store (directory slot, label pointer, or packed size word) that
/// readers pair with an acquire load. In-place mutation after publication
/// goes through the atomic views only.
pub struct Arena {
    base: *mut u8,
    capacity: usize,
    _map: MmapMut,
}

// The raw base pointer is only dereferenced through the checked accessors
// below, which uphold the publication protocol described above.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Maps `capacity` bytes (a power of two) of the file at `path`,
    /// growing the file as needed.
    pub fn open(path: &Path, capacity: usize) -> Result<Self> {
        if !capacity.is_power_of_two() {
            return Err(GraphError::Alloc("arena capacity must be a power of two"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() < capacity as u64 {
            file.set_len(capacity as u64)?;
        }
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        let base = map.as_mut_ptr();
        Ok(Self {
            base,
            capacity,
            _map: map,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn ptr(&self, offset: u64, len: usize) -> *mut u8 {
        let offset = offset as usize;
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.capacity),
            "arena access out of bounds: offset {offset} len {len}"
        );
        unsafe { self.base.add(offset) }
    }

    #[inline]
    pub(crate) fn read_u16(&self, offset: u64) -> u16 {
        unsafe { (self.ptr(offset, 2) as *const u16).read() }
    }

    #[inline]
    pub(crate) fn write_u16(&self, offset: u64, value: u16) {
        unsafe { (self.ptr(offset, 2) as *mut u16).write(value) }
    }

    #[inline]
    pub(crate) fn read_u32(&self, offset: u64) -> u32 {
        unsafe { (self.ptr(offset, 4) as *const u32).read() }
    }

    #[inline]
    pub(crate) fn write_u32(&self, offset: u64, value: u32) {
        unsafe { (self.ptr(offset, 4) as *mut u32).write(value) }
    }

    #[inline]
    pub(crate) fn read_u64(&self, offset: u64) -> u64 {
        unsafe { (self.ptr(offset, 8) as *const u64).read() }
    }

    #[inline]
    pub(crate) fn write_u64(&self, offset: u64, value: u64) {
        unsafe { (self.ptr(offset, 8) as *mut u64).write(value) }
    }

    #[inline]
    pub(crate) fn write_i64(&self, offset: u64, value: i64) {
        self.write_u64(offset, value as u64)
    }

    /// Derives an atomic view of an 8-byte-aligned timestamp word.
    #[inline]
    pub(crate) fn atomic_i64(&self, offset: u64) -> &AtomicI64 {
        let ptr = self.ptr(offset, 8);
        debug_assert_eq!(ptr as usize % 8, 0, "misaligned atomic i64");
        unsafe { &*(ptr as *const AtomicI64) }
    }

    #[inline]
    pub(crate) fn atomic_u64(&self, offset: u64) -> &AtomicU64 {
        let ptr = self.ptr(offset, 8);
        debug_assert_eq!(ptr as usize % 8, 0, "misaligned atomic u64");
        unsafe { &*(ptr as *const AtomicU64) }
    }

    #[inline]
    pub(crate) fn atomic_u8(&self, offset: u64) -> &AtomicU8 {
        unsafe { &*(self.ptr(offset, 1) as *const AtomicU8) }
    }

    #[inline]
    pub(crate) fn bytes(&self, offset: u64, len: usize) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr(offset, len), len) }
    }

    #[inline]
    pub(crate) fn write_bytes(&self, offset: u64, data: &[u8]) {
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr(offset, data.len()), data.len())
        }
    }

    #[inline]
    pub(crate) fn zero(&self, offset: u64, len: usize) {
        unsafe { std::ptr::write_bytes(self.ptr(offset, len), 0, len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_scalars_and_bytes() {
        let dir = tempdir().unwrap();
        let arena = Arena::open(&dir.path().join("arena.blk"), 1 << 16).unwrap();
        arena.write_u64(8, 0xdead_beef_cafe);
        assert_eq!(arena.read_u64(8), 0xdead_beef_cafe);
        arena.write_u16(0, 7);
        assert_eq!(arena.read_u16(0), 7);
        arena.write_bytes(128, b"estrato");
        assert_eq!(arena.bytes(128, 7), b"estrato");
        arena.zero(128, 7);
        assert_eq!(arena.bytes(128, 7), &[0u8; 7]);
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        let dir = tempdir().unwrap();
        assert!(Arena::open(&dir.path().join("arena.blk"), 3000).is_err());
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn out_of_bounds_access_panics() {
        let dir = tempdir().unwrap();
        let arena = Arena::open(&dir.path().join("arena.blk"), 1 << 12).unwrap();
        arena.read_u64((1 << 12) - 4);
    }
}
