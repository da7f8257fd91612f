//! Error types of the priority queue.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is empty, nothing to pop")]
    EmptyQueue,

    #[error("no entry with primary key `{key}`")]
    NotFound { key: String },

    /// Only produced by low-level removal; the queue never hands out stale positions.
    #[error("position {position} is out of range for a heap of length {len}")]
    PositionOutOfRange { position: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, QueueError>;
