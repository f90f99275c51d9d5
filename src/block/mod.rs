//! Block storage: a file-backed arena, a buddy allocator over it, and the
//! typed block layouts (vertex, edge-label, edge) the engine stores in it.

mod arena;
mod bloom;
mod edge;
mod label;
mod manager;
mod vertex;

pub use arena::Arena;
pub use bloom::BloomView;
pub use edge::{
    bloom_bytes, EdgeBlockView, EdgeEntryView, BLOOM_FILTER_PORTION, BLOOM_FILTER_THRESHOLD,
    EDGE_ENTRY_LEN, EDGE_HEADER_LEN,
};
pub use label::{EdgeLabelView, LABEL_ENTRY_LEN, LABEL_HEADER_LEN};
pub use manager::{BlockManager, BlockPtr, MIN_ORDER};
pub use vertex::{VertexView, VERTEX_HEADER_LEN, VERTEX_TOMBSTONE};

/// Location of a timestamp word inside the arena, pinned by a transaction
/// so commit can stamp the epoch and abort can restore the recorded value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TsSlot(pub(crate) u64);
