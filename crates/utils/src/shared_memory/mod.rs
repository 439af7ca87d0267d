//! Shared board stored in a shared-memory segment.
//!
//! The server mirrors every published snapshot into the board so that
//! player processes attached to the segment can observe the game without a
//! reply channel. The board also carries the move slot used by the
//! semaphore-gated transport: a player writes its move into the slot and then
//! posts the server semaphore.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::fence;
use std::sync::atomic::Ordering;

use api_types::PlayerId;
use api_types::UNASSIGNED;

use crate::shared_memory::mutex::ShmMutex;

pub mod handle;
pub mod mutex;

pub use handle::SharedBoardHandle;

/// Move parameters handed over through shared memory. Semaphores carry no
/// payload, so the player writes these before posting.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveSlot {
    pub player_id: PlayerId,
    pub amount: u32,
    pending: u32,
}

impl MoveSlot {
    /// Stores a move, replacing any move that was not yet taken.
    pub fn submit(&mut self, player_id: PlayerId, amount: u32) {
        self.player_id = player_id;
        self.amount = amount;
        self.pending = 1;
    }

    /// Takes the pending move, leaving the slot empty.
    pub fn take(&mut self) -> Option<(PlayerId, u32)> {
        if self.pending == 0 {
            return None;
        }
        self.pending = 0;
        Some((self.player_id, self.amount))
    }

    pub fn is_pending(&self) -> bool {
        self.pending != 0
    }
}

/// Point-in-time copy of the mirrored fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoardSnapshot {
    pub current_count: u32,
    pub current_turn: PlayerId,
    pub last_move_size: u32,
    pub last_caller: Option<PlayerId>,
    pub game_over: bool,
    pub aborted: bool,
    pub version: u64,
}

#[repr(C)]
#[derive(Debug, Default)]
struct MirrorFields {
    current_count: AtomicU32,
    current_turn: AtomicU32,
    last_move_size: AtomicU32,
    /// `UNASSIGNED` while the game is running.
    last_caller: AtomicU32,
    game_over: AtomicU32,
    aborted: AtomicU32,
    version: AtomicU64,
    /// Odd while a publish is in progress.
    sequence: AtomicU64,
}

/// Layout of the shared segment.
#[repr(C)]
pub struct SharedBoard {
    mirror: MirrorFields,
    /// Serializes mirror writers. Holds the last published version.
    publish_lock: ShmMutex<u64>,
    move_slot: ShmMutex<MoveSlot>,
}

impl Default for SharedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedBoard {
    pub fn new() -> Self {
        Self {
            mirror: MirrorFields::default(),
            publish_lock: ShmMutex::new(0),
            move_slot: ShmMutex::new(MoveSlot::default()),
        }
    }

    /// Writes `snapshot` into the mirror unless a newer version is already
    /// there. Returns whether the mirror was updated.
    pub fn publish(&self, snapshot: &BoardSnapshot) -> bool {
        let mut published = self.publish_lock.lock();
        if *published > snapshot.version {
            return false;
        }
        *published = snapshot.version;

        let m = &self.mirror;
        let sequence = m.sequence.load(Ordering::Relaxed);
        m.sequence.store(sequence.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        m.current_count
            .store(snapshot.current_count, Ordering::Relaxed);
        m.current_turn.store(snapshot.current_turn, Ordering::Relaxed);
        m.last_move_size
            .store(snapshot.last_move_size, Ordering::Relaxed);
        m.last_caller.store(
            snapshot.last_caller.unwrap_or(UNASSIGNED),
            Ordering::Relaxed,
        );
        m.aborted.store(snapshot.aborted as u32, Ordering::Relaxed);
        m.game_over.store(snapshot.game_over as u32, Ordering::Relaxed);
        m.version.store(snapshot.version, Ordering::Relaxed);

        m.sequence.store(sequence.wrapping_add(2), Ordering::Release);
        true
    }

    /// Reads the mirror without locking, retrying while a publish is in
    /// progress so every field comes from the same snapshot.
    pub fn read(&self) -> BoardSnapshot {
        let m = &self.mirror;
        loop {
            let before = m.sequence.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let last_caller = m.last_caller.load(Ordering::Relaxed);
            let snapshot = BoardSnapshot {
                current_count: m.current_count.load(Ordering::Relaxed),
                current_turn: m.current_turn.load(Ordering::Relaxed),
                last_move_size: m.last_move_size.load(Ordering::Relaxed),
                last_caller: (last_caller != UNASSIGNED).then_some(last_caller),
                game_over: m.game_over.load(Ordering::Relaxed) != 0,
                aborted: m.aborted.load(Ordering::Relaxed) != 0,
                version: m.version.load(Ordering::Relaxed),
            };
            fence(Ordering::Acquire);
            if m.sequence.load(Ordering::Relaxed) == before {
                return snapshot;
            }
        }
    }

    pub fn move_slot(&self) -> &ShmMutex<MoveSlot> {
        &self.move_slot
    }

    /// Player side of the semaphore protocol: store a move for the server.
    pub fn submit_move(&self, player_id: PlayerId, amount: u32) {
        self.move_slot.lock().submit(player_id, amount);
    }

    /// Server side of the semaphore protocol.
    pub fn take_move(&self) -> Option<(PlayerId, u32)> {
        self.move_slot.lock().take()
    }
}
