use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid transaction: {0}")]
    InvalidTransaction(&'static str),
    #[error("invalid vertex id: {0}")]
    InvalidVertex(u64),
    #[error("write-write conflict on {0}")]
    Conflict(String),
    #[error("block allocation failed: {0}")]
    Alloc(&'static str),
    #[error("wal failure: {0}")]
    Wal(String),
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
}

impl GraphError {
    /// `true` when the error is the optimistic-conflict fault: the
    /// transaction is unusable and the caller may retry with a fresh one.
    pub fn is_conflict(&self) -> bool {
        matches!(self, GraphError::Conflict(_))
    }
}
