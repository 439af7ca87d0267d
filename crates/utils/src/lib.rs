//! IPC plumbing shared by the BR31 server and player processes.

pub mod fifo;
pub mod logging;
pub mod msg_queue;
pub mod semaphore;
pub mod shared_memory;

use std::io;
use std::path::PathBuf;

use api_types::WireError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("shared memory `{identifier}`: {source}")]
    SharedMemory {
        identifier: String,
        #[source]
        source: ::shared_memory::ShmemError,
    },

    #[error("shared memory `{identifier}` is {actual} bytes, expected at least {expected}")]
    SegmentTooSmall {
        identifier: String,
        actual: usize,
        expected: usize,
    },

    #[error("semaphore `{name}`: {source}")]
    Semaphore {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("message queue {key:#x}: {source}")]
    MessageQueue {
        key: i32,
        #[source]
        source: io::Error,
    },

    #[error("fifo `{}`: {source}", path.display())]
    Fifo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid endpoint name `{0}`")]
    InvalidName(String),

    #[error("malformed record: {0}")]
    Wire(#[from] WireError),
}
