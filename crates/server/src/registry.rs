use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::PoisonError;

use api_types::PlayerId;

use crate::adapters::TransportKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEntry {
    pub player_id: PlayerId,
    pub transport: TransportKind,
    /// FIFO the publisher writes status records to.
    pub reply_channel: Option<PathBuf>,
}

/// Where each registered player can be reached.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    entries: Mutex<BTreeMap<PlayerId, PlayerEntry>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a player. Registering again keeps the original transport and
    /// only replaces the reply channel when a new one is given.
    pub fn insert(&self, entry: PlayerEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(&entry.player_id) {
            Some(existing) => {
                if entry.reply_channel.is_some() {
                    existing.reply_channel = entry.reply_channel;
                }
            }
            None => {
                entries.insert(entry.player_id, entry);
            }
        }
    }

    pub fn remove(&self, player_id: PlayerId) -> Option<PlayerEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&player_id)
    }

    pub fn get(&self, player_id: PlayerId) -> Option<PlayerEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&player_id)
            .cloned()
    }

    /// Players that asked for status records, with their reply FIFOs.
    pub fn reply_targets(&self) -> Vec<(PlayerId, PathBuf)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(|e| e.reply_channel.clone().map(|path| (e.player_id, path)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
