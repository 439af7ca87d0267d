//! System V message queues carrying fixed-size move records.

use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use api_types::MoveRequest;
use api_types::PlayerId;
use api_types::WireError;
use api_types::MAX_REPLY_PATH_LEN;

use crate::IpcError;

/// Message type of a move or registration record.
pub const MOVE_MESSAGE: libc::c_long = 1;
/// Message type the server sends to itself to unblock its receiver.
pub const WAKE_MESSAGE: libc::c_long = 2;

#[repr(C)]
#[derive(Clone, Copy)]
struct RawMessage {
    mtype: libc::c_long,
    player_id: PlayerId,
    amount: u32,
    reply_path: [u8; MAX_REPLY_PATH_LEN],
}

const PAYLOAD_SIZE: usize = mem::size_of::<RawMessage>() - mem::size_of::<libc::c_long>();

impl RawMessage {
    fn empty() -> Self {
        Self {
            mtype: 0,
            player_id: 0,
            amount: 0,
            reply_path: [0; MAX_REPLY_PATH_LEN],
        }
    }

    fn encode(message: &QueueMessage) -> Result<Self, WireError> {
        let mut raw = Self::empty();
        match message {
            QueueMessage::Wake => raw.mtype = WAKE_MESSAGE,
            QueueMessage::Move(request) => {
                raw.mtype = MOVE_MESSAGE;
                raw.player_id = request.player_id;
                raw.amount = request.amount;
                if let Some(path) = &request.reply_channel {
                    let bytes = path.as_os_str().as_bytes();
                    // Keep room for the terminating NUL.
                    if bytes.len() >= MAX_REPLY_PATH_LEN {
                        return Err(WireError::ReplyPathTooLong);
                    }
                    raw.reply_path[..bytes.len()].copy_from_slice(bytes);
                }
            }
        }
        Ok(raw)
    }

    fn decode(&self) -> Result<QueueMessage, WireError> {
        match self.mtype {
            WAKE_MESSAGE => Ok(QueueMessage::Wake),
            MOVE_MESSAGE => {
                let len = self
                    .reply_path
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(MAX_REPLY_PATH_LEN);
                let reply_channel = match len {
                    0 => None,
                    len => {
                        let path = std::str::from_utf8(&self.reply_path[..len]).map_err(|_| {
                            WireError::InvalidField {
                                field: "reply_channel",
                                value: String::from_utf8_lossy(&self.reply_path[..len])
                                    .into_owned(),
                            }
                        })?;
                        Some(PathBuf::from(path))
                    }
                };
                Ok(QueueMessage::Move(MoveRequest {
                    player_id: self.player_id,
                    amount: self.amount,
                    reply_channel,
                }))
            }
            other => Err(WireError::InvalidField {
                field: "mtype",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueMessage {
    Move(MoveRequest),
    Wake,
}

/// Handle to a System V message queue identified by an IPC key.
#[derive(Debug)]
pub struct MessageQueue {
    id: libc::c_int,
    key: libc::key_t,
    owner: bool,
}

impl MessageQueue {
    /// Creates the queue, reusing and draining one left behind by an unclean
    /// shutdown. The owner removes the queue on drop.
    pub fn create(key: i32) -> Result<Self, IpcError> {
        let id = unsafe { libc::msgget(key as libc::key_t, libc::IPC_CREAT | 0o666) };
        let queue = Self::check(id, key, true)?;
        let mut drained = 0usize;
        while queue.try_receive_raw()?.is_some() {
            drained += 1;
        }
        if drained > 0 {
            tracing::info!(key, drained, "Discarded stale messages from reused queue");
        }
        Ok(queue)
    }

    /// Opens a queue created by another process.
    pub fn open(key: i32) -> Result<Self, IpcError> {
        let id = unsafe { libc::msgget(key as libc::key_t, 0) };
        Self::check(id, key, false)
    }

    fn check(id: libc::c_int, key: i32, owner: bool) -> Result<Self, IpcError> {
        if id == -1 {
            return Err(IpcError::MessageQueue {
                key,
                source: io::Error::last_os_error(),
            });
        }
        Ok(Self {
            id,
            key: key as libc::key_t,
            owner,
        })
    }

    fn error(&self, source: io::Error) -> IpcError {
        IpcError::MessageQueue {
            key: self.key as i32,
            source,
        }
    }

    pub fn key(&self) -> i32 {
        self.key as i32
    }

    /// Sends without blocking; a full queue is reported as `WouldBlock`.
    pub fn send(&self, message: &QueueMessage) -> Result<(), IpcError> {
        let raw = RawMessage::encode(message)?;
        let ret = unsafe {
            libc::msgsnd(
                self.id,
                &raw as *const RawMessage as *const libc::c_void,
                PAYLOAD_SIZE,
                libc::IPC_NOWAIT,
            )
        };
        if ret == -1 {
            return Err(self.error(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn receive_raw(&self, flags: libc::c_int) -> Result<Option<RawMessage>, IpcError> {
        let mut raw = RawMessage::empty();
        loop {
            let ret = unsafe {
                libc::msgrcv(
                    self.id,
                    &mut raw as *mut RawMessage as *mut libc::c_void,
                    PAYLOAD_SIZE,
                    0,
                    flags,
                )
            };
            if ret >= 0 {
                return Ok(Some(raw));
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ENOMSG) if flags & libc::IPC_NOWAIT != 0 => return Ok(None),
                _ => return Err(self.error(err)),
            }
        }
    }

    fn try_receive_raw(&self) -> Result<Option<RawMessage>, IpcError> {
        self.receive_raw(libc::IPC_NOWAIT | libc::MSG_NOERROR)
    }

    /// Blocks until a message arrives.
    pub fn receive(&self) -> Result<QueueMessage, IpcError> {
        let raw = self
            .receive_raw(libc::MSG_NOERROR)?
            .ok_or_else(|| self.error(io::ErrorKind::UnexpectedEof.into()))?;
        Ok(raw.decode()?)
    }

    pub fn try_receive(&self) -> Result<Option<QueueMessage>, IpcError> {
        match self.try_receive_raw()? {
            Some(raw) => Ok(Some(raw.decode()?)),
            None => Ok(None),
        }
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        if unsafe { libc::msgctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) } == -1 {
            tracing::warn!(
                key = self.key as i32,
                error = %io::Error::last_os_error(),
                "Failed to remove message queue"
            );
        } else {
            tracing::debug!(key = self.key as i32, "Removed message queue");
        }
    }
}
