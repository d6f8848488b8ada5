//! Error types for shared-memory, FIFO, and socket plumbing.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("shared memory region '{0}' failed: {1}")]
    Shm(String, std::io::Error),

    #[error("fifo '{0}' failed: {1}")]
    Fifo(String, std::io::Error),

    #[error("socket operation failed: {0}")]
    Socket(#[from] std::io::Error),

    #[error("no free socket slot in [0, {0})")]
    NoFreeSocketSlot(u32),

    #[error("record read returned {got} bytes, expected {want}")]
    ShortRead { got: usize, want: usize },

    #[error("poll timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, IpcError>;
