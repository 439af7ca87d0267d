//! Periodic status pushes to reply FIFOs and the shared board mirror.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use api_types::PlayerId;
use api_types::StatusRecord;
use clap::ValueEnum;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;
use utils::fifo;
use utils::shared_memory::SharedBoardHandle;
use utils::IpcError;

use crate::arbiter::TurnArbiter;
use crate::registry::PlayerRegistry;
use crate::state_store::GameState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum StatusFormat {
    #[default]
    Text,
    Json,
}

impl StatusFormat {
    /// One newline-terminated record.
    pub fn encode(self, record: &StatusRecord) -> String {
        match self {
            StatusFormat::Text => format!("{record}\n"),
            StatusFormat::Json => match serde_json::to_string(record) {
                Ok(json) => format!("{json}\n"),
                Err(e) => {
                    warn!(error = %e, "Failed to encode status as json, sending text");
                    format!("{record}\n")
                }
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub interval: Duration,
    pub format: StatusFormat,
    /// Publications in a row a reply FIFO may lack a reader.
    pub disconnect_after: u32,
}

#[derive(Default)]
struct ReplyWriter {
    file: Option<File>,
    misses: u32,
}

enum Delivery {
    Sent,
    Skipped,
    Gone(String),
}

pub struct Publisher {
    arbiter: Arc<TurnArbiter>,
    registry: Arc<PlayerRegistry>,
    board: Option<Arc<SharedBoardHandle>>,
    config: PublisherConfig,
    stop: CancellationToken,
}

impl Publisher {
    pub fn new(
        arbiter: Arc<TurnArbiter>,
        registry: Arc<PlayerRegistry>,
        board: Option<Arc<SharedBoardHandle>>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            arbiter,
            registry,
            board,
            config,
            stop: CancellationToken::new(),
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Publishes every interval until the run ends or [`stop`](Self::stop)
    /// is called, then publishes the final state once more.
    pub async fn run(&self) {
        let store = self.arbiter.store();
        let mut changes = store.subscribe();
        let mut writers = HashMap::new();
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {}
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if changes.borrow_and_update().is_finished() {
                        break;
                    }
                    continue;
                }
            }
            let snapshot = store.snapshot();
            if snapshot.is_finished() {
                break;
            }
            self.publish(&snapshot, &mut writers);
        }

        let last = store.snapshot();
        self.publish(&last, &mut writers);
        info!(status = %last.status(), "Published final status");
    }

    fn publish(&self, snapshot: &GameState, writers: &mut HashMap<PlayerId, ReplyWriter>) {
        if let Some(board) = &self.board {
            board.board().publish(&snapshot.to_board());
        }

        let line = self.config.format.encode(&snapshot.status());
        let targets = self.registry.reply_targets();
        writers.retain(|player, _| targets.iter().any(|(p, _)| p == player));

        for (player_id, path) in targets {
            let writer = writers.entry(player_id).or_default();
            match self.deliver(writer, &path, line.as_bytes()) {
                Delivery::Sent => writer.misses = 0,
                Delivery::Skipped => {}
                Delivery::Gone(reason) => {
                    writers.remove(&player_id);
                    self.drop_player(player_id, &path, &reason);
                }
            }
        }
    }

    fn deliver(&self, writer: &mut ReplyWriter, path: &Path, line: &[u8]) -> Delivery {
        if writer.file.is_none() {
            match fifo::open_writer(path) {
                Ok(file) => writer.file = Some(file),
                Err(IpcError::Fifo { source, .. }) if fifo::is_reader_absent(&source) => {
                    writer.misses += 1;
                    if writer.misses >= self.config.disconnect_after {
                        return Delivery::Gone(format!(
                            "no reader after {} attempts",
                            writer.misses
                        ));
                    }
                    debug!(path = %path.display(), misses = writer.misses, "Reply fifo has no reader yet");
                    return Delivery::Skipped;
                }
                Err(e) => return Delivery::Gone(e.to_string()),
            }
        }

        let Some(file) = writer.file.as_mut() else {
            return Delivery::Skipped;
        };
        match file.write_all(line) {
            Ok(()) => Delivery::Sent,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!(path = %path.display(), "Reply fifo full, skipping");
                Delivery::Skipped
            }
            Err(e) if fifo::is_disconnected(&e) => Delivery::Gone(e.to_string()),
            Err(e) => {
                // Reopen on the next publication.
                warn!(path = %path.display(), error = %e, "Reply fifo write failed");
                writer.file = None;
                Delivery::Skipped
            }
        }
    }

    fn drop_player(&self, player_id: PlayerId, path: &Path, reason: &str) {
        warn!(player_id, path = %path.display(), reason, "Observer unreachable, unregistering");
        self.registry.remove(player_id);
        self.arbiter.unregister(player_id);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::path::PathBuf;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::adapters::TransportKind;
    use crate::arbiter::GameRules;
    use crate::registry::PlayerEntry;
    use crate::state_store::StateStore;

    fn publisher(disconnect_after: u32) -> Arc<Publisher> {
        let store = Arc::new(StateStore::new());
        Arc::new(Publisher::new(
            Arc::new(TurnArbiter::new(store, GameRules::default())),
            Arc::new(PlayerRegistry::new()),
            None,
            PublisherConfig {
                interval: Duration::from_millis(5),
                format: StatusFormat::Text,
                disconnect_after,
            },
        ))
    }

    fn register(publisher: &Publisher, player_id: PlayerId, reply: &Path) {
        publisher.arbiter.register(player_id);
        publisher.registry.insert(PlayerEntry {
            player_id,
            transport: TransportKind::Pipe,
            reply_channel: Some(reply.to_path_buf()),
        });
    }

    #[test]
    fn json_status_is_tagged() {
        let line = StatusFormat::Json.encode(&StatusRecord::Aborted { final_count: 4 });
        assert_eq!(line, "{\"state\":\"aborted\",\"final_count\":4}\n");
    }

    #[test]
    fn pushes_status_to_reply_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let reply = dir.path().join("resp_1");
        fifo::create(&reply).unwrap();
        let mut reader = fifo::open_reader(&reply).unwrap();

        let publisher = publisher(3);
        register(&publisher, 1, &reply);
        let mut writers = HashMap::new();
        publisher.publish(&publisher.arbiter.store().snapshot(), &mut writers);

        let mut buf = [0u8; 128];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(
            std::str::from_utf8(&buf[..n]).unwrap(),
            "count=0 turn=1 players=1\n"
        );
    }

    #[test]
    fn missing_fifo_unregisters_player() {
        let publisher = publisher(3);
        register(&publisher, 1, Path::new("/nonexistent/br31_resp_1"));
        register(&publisher, 2, Path::new("/nonexistent/br31_resp_2"));
        publisher.publish(&publisher.arbiter.store().snapshot(), &mut HashMap::new());

        assert!(publisher.registry.is_empty());
        let state = publisher.arbiter.store().snapshot();
        assert!(state.registered_players.is_empty());
    }

    #[test]
    fn regular_file_reply_path_is_never_written() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("victim.conf");
        std::fs::write(&target, b"important=config\n").unwrap();

        let publisher = publisher(3);
        register(&publisher, 1, &target);
        register(&publisher, 2, Path::new("/nonexistent/br31_resp_2"));
        let mut writers = HashMap::new();
        publisher.publish(&publisher.arbiter.store().snapshot(), &mut writers);

        assert_eq!(std::fs::read(&target).unwrap(), b"important=config\n");
        assert!(publisher.registry.get(1).is_none());
        assert!(!publisher
            .arbiter
            .store()
            .snapshot()
            .registered_players
            .contains(&1));
        assert!(writers.is_empty());
    }

    #[test]
    fn absent_reader_is_tolerated_up_to_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let reply = dir.path().join("resp_2");
        fifo::create(&reply).unwrap();

        let publisher = publisher(3);
        register(&publisher, 2, &reply);
        let mut writers = HashMap::new();
        for _ in 0..2 {
            publisher.publish(&publisher.arbiter.store().snapshot(), &mut writers);
            assert!(publisher.registry.get(2).is_some());
        }
        publisher.publish(&publisher.arbiter.store().snapshot(), &mut writers);
        assert!(publisher.registry.get(2).is_none());
    }

    #[test]
    fn closed_reader_unregisters_player() {
        let dir = tempfile::tempdir().unwrap();
        let reply = dir.path().join("resp_3");
        fifo::create(&reply).unwrap();
        let reader = fifo::open_reader(&reply).unwrap();

        let publisher = publisher(3);
        register(&publisher, 3, &reply);
        register(&publisher, 4, &PathBuf::from("/nonexistent/br31_resp_4"));
        let mut writers = HashMap::new();
        publisher.publish(&publisher.arbiter.store().snapshot(), &mut writers);
        assert!(publisher.registry.get(3).is_some());

        drop(reader);
        publisher.publish(&publisher.arbiter.store().snapshot(), &mut writers);
        assert!(publisher.registry.get(3).is_none());
    }

    #[test_log::test(tokio::test)]
    async fn final_publication_carries_terminal_record() {
        let dir = tempfile::tempdir().unwrap();
        let reply = dir.path().join("resp_1");
        fifo::create(&reply).unwrap();
        let mut reader = fifo::open_reader(&reply).unwrap();

        let publisher = publisher(3);
        register(&publisher, 1, &reply);
        let task = Arc::clone(&publisher).spawn();
        publisher.arbiter.abort();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        let mut received = String::new();
        let mut buf = [0u8; 256];
        while let Ok(n) = reader.read(&mut buf) {
            if n == 0 {
                break;
            }
            received.push_str(std::str::from_utf8(&buf[..n]).unwrap());
        }
        let last = received.lines().last().unwrap();
        assert_eq!(last, "END: ended=false aborted=true final_count=0");
    }
}
