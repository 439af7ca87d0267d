use shared_memory::Shmem;
use shared_memory::ShmemConf;
use shared_memory::ShmemError;
use tracing::info;

use super::SharedBoard;
use crate::IpcError;

/// Attachment to the shared board segment.
///
/// The creating side owns the segment and unlinks it when the handle is
/// dropped; handles obtained with [`SharedBoardHandle::open`] only detach.
pub struct SharedBoardHandle {
    shmem: Shmem,
    ptr: *mut SharedBoard,
    identifier: String,
}

// The board only contains atomics and `ShmMutex`es.
unsafe impl Send for SharedBoardHandle {}
unsafe impl Sync for SharedBoardHandle {}

impl SharedBoardHandle {
    /// Creates the segment, reusing one left behind by an unclean shutdown,
    /// and initializes an empty board in it.
    pub fn create(identifier: &str) -> Result<Self, IpcError> {
        let size = std::mem::size_of::<SharedBoard>();
        let mut shmem = match ShmemConf::new().size(size).os_id(identifier).create() {
            Ok(shmem) => shmem,
            Err(ShmemError::MappingIdExists | ShmemError::LinkExists) => {
                info!(identifier = %identifier, "Reusing existing shared memory segment");
                ShmemConf::new()
                    .os_id(identifier)
                    .open()
                    .map_err(|source| IpcError::SharedMemory {
                        identifier: identifier.to_string(),
                        source,
                    })?
            }
            Err(source) => {
                return Err(IpcError::SharedMemory {
                    identifier: identifier.to_string(),
                    source,
                })
            }
        };
        shmem.set_owner(true);

        let handle = Self::from_shmem(shmem, identifier)?;
        unsafe {
            handle.ptr.write(SharedBoard::new());
        }

        info!(identifier = %identifier, size, "Created shared board");
        Ok(handle)
    }

    /// Attaches to a board created by another process.
    pub fn open(identifier: &str) -> Result<Self, IpcError> {
        let mut shmem = ShmemConf::new()
            .os_id(identifier)
            .open()
            .map_err(|source| IpcError::SharedMemory {
                identifier: identifier.to_string(),
                source,
            })?;
        shmem.set_owner(false);
        Self::from_shmem(shmem, identifier)
    }

    fn from_shmem(shmem: Shmem, identifier: &str) -> Result<Self, IpcError> {
        let expected = std::mem::size_of::<SharedBoard>();
        if shmem.len() < expected {
            return Err(IpcError::SegmentTooSmall {
                identifier: identifier.to_string(),
                actual: shmem.len(),
                expected,
            });
        }
        let ptr = shmem.as_ptr() as *mut SharedBoard;
        Ok(Self {
            shmem,
            ptr,
            identifier: identifier.to_string(),
        })
    }

    pub fn board(&self) -> &SharedBoard {
        unsafe { &*self.ptr }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_owner(&self) -> bool {
        self.shmem.is_owner()
    }
}

impl Drop for SharedBoardHandle {
    fn drop(&mut self) {
        if self.shmem.is_owner() {
            info!(identifier = %self.identifier, "Removing shared board");
        }
    }
}
