//! IPC resources owned by the server, released in reverse order of
//! acquisition.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing::warn;
use utils::fifo;
use utils::msg_queue::MessageQueue;
use utils::semaphore::NamedSemaphore;
use utils::shared_memory::SharedBoardHandle;
use utils::IpcError;

enum Endpoint {
    Board(Arc<SharedBoardHandle>),
    Semaphore(Arc<NamedSemaphore>),
    Queue(Arc<MessageQueue>),
    Fifo(PathBuf),
}

impl Endpoint {
    fn describe(&self) -> String {
        match self {
            Endpoint::Board(board) => format!("shared board {}", board.identifier()),
            Endpoint::Semaphore(sem) => format!("semaphore {}", sem.name()),
            Endpoint::Queue(queue) => format!("message queue {}", queue.key()),
            Endpoint::Fifo(path) => format!("fifo {}", path.display()),
        }
    }

    fn shared_elsewhere(&self) -> bool {
        match self {
            Endpoint::Board(board) => Arc::strong_count(board) > 1,
            Endpoint::Semaphore(sem) => Arc::strong_count(sem) > 1,
            Endpoint::Queue(queue) => Arc::strong_count(queue) > 1,
            Endpoint::Fifo(_) => false,
        }
    }

    /// Gives up our handle. Returns whether the endpoint is gone from the
    /// system after this call.
    fn release(self) -> bool {
        let name = self.describe();
        if self.shared_elsewhere() {
            warn!(endpoint = %name, "Endpoint still referenced, removal deferred to last holder");
            return false;
        }
        match self {
            Endpoint::Fifo(path) => {
                if let Err(e) = fifo::remove(&path) {
                    warn!(endpoint = %name, error = %e, "Failed to remove endpoint");
                    return false;
                }
            }
            // Owner handles unlink themselves when the last reference drops.
            Endpoint::Board(_) | Endpoint::Semaphore(_) | Endpoint::Queue(_) => {}
        }
        info!(endpoint = %name, "Released endpoint");
        true
    }
}

/// Acquisition stack. Dropping it releases whatever is still held.
#[derive(Default)]
pub struct Endpoints {
    acquired: Vec<Endpoint>,
}

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn board(&mut self, identifier: &str) -> Result<Arc<SharedBoardHandle>, IpcError> {
        let board = Arc::new(SharedBoardHandle::create(identifier)?);
        self.acquired.push(Endpoint::Board(Arc::clone(&board)));
        Ok(board)
    }

    pub fn semaphore(&mut self, name: &str) -> Result<Arc<NamedSemaphore>, IpcError> {
        let sem = Arc::new(NamedSemaphore::create(name)?);
        self.acquired.push(Endpoint::Semaphore(Arc::clone(&sem)));
        Ok(sem)
    }

    pub fn queue(&mut self, key: i32) -> Result<Arc<MessageQueue>, IpcError> {
        let queue = Arc::new(MessageQueue::create(key)?);
        self.acquired.push(Endpoint::Queue(Arc::clone(&queue)));
        Ok(queue)
    }

    pub fn fifo(&mut self, path: &Path) -> Result<(), IpcError> {
        fifo::create(path)?;
        self.acquired.push(Endpoint::Fifo(path.to_path_buf()));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.acquired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acquired.is_empty()
    }

    /// Releases everything, most recently acquired first. Returns how many
    /// endpoints were removed right away.
    pub fn release(&mut self) -> usize {
        let mut removed = 0;
        while let Some(endpoint) = self.acquired.pop() {
            if endpoint.release() {
                removed += 1;
            }
        }
        removed
    }
}

impl Drop for Endpoints {
    fn drop(&mut self) {
        self.release();
    }
}
