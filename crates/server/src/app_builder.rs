use std::sync::Arc;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;

use crate::adapters::ChannelAdapter;
use crate::adapters::PipeAdapter;
use crate::adapters::QueueAdapter;
use crate::adapters::SemaphoreAdapter;
use crate::adapters::TransportKind;
use crate::arbiter::GameRules;
use crate::config::CoordinatorConfig;
use crate::config::ServeArgs;
use crate::coordinator::Coordinator;
use crate::coordinator::CoordinatorBuilder;

/// Turns command line arguments into a ready [`Coordinator`].
///
/// Every endpoint is acquired here, before any adapter runs. If one of them
/// cannot be acquired the ones already held are released and the error is
/// returned.
pub struct ApplicationBuilder {
    args: ServeArgs,
}

impl ApplicationBuilder {
    pub fn new(args: ServeArgs) -> Self {
        Self { args }
    }

    pub fn build(self) -> Result<Coordinator> {
        tracing::info!("Building coordinator components...");

        let rules = GameRules::from(&self.args);
        if rules.limit == 0 || rules.max_step == 0 {
            bail!("limit and max step must both be at least 1");
        }
        let config = CoordinatorConfig::from(&self.args);
        let mut builder = CoordinatorBuilder::new(rules, config.clone());

        for &player_id in &self.args.players {
            builder.register_player(player_id, None)?;
        }

        let endpoints = &self.args.endpoints;
        let board = builder
            .endpoints()
            .board(&endpoints.board_id)
            .with_context(|| format!("failed to create shared board {}", endpoints.board_id))?;
        builder.set_board(Arc::clone(&board));

        let mut transports = self.args.transports.clone();
        transports.sort();
        transports.dedup();

        for transport in transports {
            let adapter = match transport {
                TransportKind::Pipe => {
                    let path = &endpoints.request_fifo;
                    builder
                        .endpoints()
                        .fifo(path)
                        .with_context(|| format!("failed to create fifo {}", path.display()))?;
                    let format = self.args.pipe_format;
                    let adapter = PipeAdapter::open(path, config.poll_interval, format)
                        .with_context(|| format!("failed to open fifo {}", path.display()))?;
                    ChannelAdapter::Pipe(Arc::new(adapter))
                }
                TransportKind::Semaphore => {
                    let server_name = endpoints.server_semaphore();
                    let server = builder
                        .endpoints()
                        .semaphore(&server_name)
                        .with_context(|| format!("failed to create semaphore {server_name}"))?;

                    if endpoints.semaphore_players.is_empty() {
                        tracing::warn!("Semaphore transport enabled without semaphore players");
                    }
                    let mut players = Vec::new();
                    for &player_id in &endpoints.semaphore_players {
                        let name = endpoints.player_semaphore(player_id);
                        let sem = builder
                            .endpoints()
                            .semaphore(&name)
                            .with_context(|| format!("failed to create semaphore {name}"))?;
                        builder.register_player(player_id, Some(TransportKind::Semaphore))?;
                        players.push((player_id, sem));
                    }
                    ChannelAdapter::Semaphore(Arc::new(SemaphoreAdapter::new(
                        server,
                        players,
                        Arc::clone(&board),
                    )))
                }
                TransportKind::Queue => {
                    let key = endpoints.queue_key;
                    let queue = builder
                        .endpoints()
                        .queue(key)
                        .with_context(|| format!("failed to create message queue {key}"))?;
                    ChannelAdapter::Queue(Arc::new(QueueAdapter::new(queue)))
                }
                TransportKind::Direct => {
                    tracing::warn!("Direct transport is only available in process, ignoring");
                    continue;
                }
            };
            builder.add_adapter(adapter);
        }

        tracing::info!(
            limit = rules.limit,
            max_step = rules.max_step,
            overshoot = ?rules.overshoot,
            endpoints = builder.endpoints().len(),
            "Coordinator components ready"
        );
        Ok(builder.build())
    }
}
