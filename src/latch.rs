use crossbeam_queue::SegQueue;
use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;

use crate::types::VertexId;

/// One single-writer latch per vertex slot.
///
/// Writable transactions acquire with [`try_lock`](Self::try_lock) and
/// treat failure as a write-write conflict, so acquisition never blocks
/// and cannot deadlock. Batch loaders use the blocking
/// [`lock`](Self::lock) and hold the latch across a single edit.
pub struct VertexLatches {
    slots: Box<[RawMutex]>,
}

impl VertexLatches {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| RawMutex::INIT).collect();
        Self { slots }
    }

    pub fn lock(&self, vertex: VertexId) {
        self.slots[vertex as usize].lock();
    }

    pub fn try_lock(&self, vertex: VertexId) -> bool {
        self.slots[vertex as usize].try_lock()
    }

    /// Releases a latch previously acquired by this thread of control.
    pub fn unlock(&self, vertex: VertexId) {
        // Paired with a successful lock/try_lock by the owning transaction.
        unsafe { self.slots[vertex as usize].unlock() }
    }
}

/// Concurrent FIFO of vertex ids freed with `recycle = true`, available
/// for reuse by `new_vertex`.
pub struct RecycledIds {
    queue: SegQueue<VertexId>,
}

impl RecycledIds {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    pub fn push(&self, vertex: VertexId) {
        self.queue.push(vertex);
    }

    pub fn pop(&self) -> Option<VertexId> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for RecycledIds {
    fn default() -> Self {
        Self::new()
    }
}
