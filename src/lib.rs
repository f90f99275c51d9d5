//! Transactional, multi-version, in-memory property graph store.
//!
//! Concurrent readers observe a consistent snapshot; serializable writers
//! detect write-write conflicts optimistically and publish atomically at
//! an epoch assigned by the commit manager. Every edge carries an
//! application-assigned version so queries can select edges within a
//! version range without materializing history externally. Committed
//! transactions are made durable through an append-only write-ahead log
//! replayed on open.

pub mod block;
pub mod compact;
pub mod epoch;
pub mod error;
pub mod graph;
pub mod latch;
pub mod txn;
pub mod types;
pub mod wal;

pub use crate::error::{GraphError, Result};
pub use crate::graph::{Graph, GraphConfig};
pub use crate::txn::{EdgeIterator, EdgeRef, EdgeVersionIterator, Transaction, TxnMode};
pub use crate::types::{Label, Timestamp, VertexId, ROLLBACK_TOMBSTONE, UNVERSIONED};
